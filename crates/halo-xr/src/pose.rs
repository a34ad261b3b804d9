//! Tracking of pose actions against the stage space.

use std::cell::Cell;
use std::rc::Rc;

use glam::{Quat, Vec3};

use crate::actions::ActionKey;
use crate::error::{RtResultExt, XrError, XrResult};
use crate::runtime::{ActionHandle, SessionHandle, SpaceHandle, XrRuntime};
use crate::types::{Pose, SpaceLocation, Time};

/// Entity identifier in the scene collaborator's transform store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub u64);

/// Write access to a scene's transform data.
pub trait SceneTransforms {
    fn set_transform(&mut self, entity: EntityId, position: Vec3, orientation: Quat);
}

/// Where a mirrored pose lands in the scene, and the offset applied first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MirrorTarget {
    pub entity: EntityId,
    pub offset_position: Vec3,
    pub offset_orientation: Quat,
}

impl MirrorTarget {
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            offset_position: Vec3::ZERO,
            offset_orientation: Quat::IDENTITY,
        }
    }

    pub fn with_offset(mut self, position: Vec3, orientation: Quat) -> Self {
        self.offset_position = position;
        self.offset_orientation = orientation;
        self
    }

    /// `offset_position + tracked_position`, `offset_orientation * tracked_orientation`.
    pub fn compose(&self, tracked: &Pose) -> (Vec3, Quat) {
        (
            self.offset_position + tracked.position(),
            self.offset_orientation * tracked.orientation(),
        )
    }
}

/// Shared output slot a tracked pose is written into once per frame.
#[derive(Debug, Clone, Default)]
pub struct PoseSlot(Rc<Cell<SpaceLocation>>);

impl PoseSlot {
    pub fn pose(&self) -> Pose {
        self.0.get().pose
    }

    pub fn location(&self) -> SpaceLocation {
        self.0.get()
    }

    fn store(&self, location: SpaceLocation) {
        self.0.set(location);
    }
}

/// What the caller hands to `register_pose_actions`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseActionRequest {
    pub key: ActionKey,
    pub mirror: Option<MirrorTarget>,
}

impl PoseActionRequest {
    pub fn new(key: ActionKey) -> Self {
        Self { key, mirror: None }
    }

    pub fn mirrored(key: ActionKey, target: MirrorTarget) -> Self {
        Self {
            key,
            mirror: Some(target),
        }
    }
}

#[derive(Debug)]
struct PoseActionEntry {
    key: ActionKey,
    action: ActionHandle,
    space: Option<SpaceHandle>,
    slot: PoseSlot,
    mirror: Option<MirrorTarget>,
}

#[derive(Debug, Default)]
pub struct PoseTracker {
    entries: Vec<PoseActionEntry>,
}

impl PoseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ActionKey) -> bool {
        self.entries.iter().any(|entry| &entry.key == key)
    }

    pub fn slot(&self, key: &ActionKey) -> Option<PoseSlot> {
        self.entries
            .iter()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.slot.clone())
    }

    /// Number of entries that currently hold a runtime space.
    pub fn live_spaces(&self) -> usize {
        self.entries.iter().filter(|entry| entry.space.is_some()).count()
    }

    /// Check a batch of registrations without changing anything.
    pub fn check_new(&self, keys: &[&ActionKey]) -> XrResult<()> {
        for (index, key) in keys.iter().enumerate() {
            if self.contains(key) || keys[..index].contains(key) {
                return Err(XrError::DuplicatePoseAction(key.to_string()));
            }
        }
        Ok(())
    }

    /// Register resolved pose actions. Rejects the whole batch on any duplicate.
    pub fn register(
        &mut self,
        entries: Vec<(ActionKey, ActionHandle, Option<MirrorTarget>)>,
    ) -> XrResult<Vec<PoseSlot>> {
        let keys: Vec<&ActionKey> = entries.iter().map(|(key, _, _)| key).collect();
        self.check_new(&keys)?;
        let mut slots = Vec::with_capacity(entries.len());
        for (key, action, mirror) in entries {
            let slot = PoseSlot::default();
            slots.push(slot.clone());
            tracing::debug!(action = %key, mirrored = mirror.is_some(), "pose action registered");
            self.entries.push(PoseActionEntry {
                key,
                action,
                space: None,
                slot,
                mirror,
            });
        }
        Ok(slots)
    }

    /// Create action spaces for every entry that lacks one.
    ///
    /// On failure the spaces created by this call are destroyed again.
    pub fn create_spaces<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        session: SessionHandle,
    ) -> XrResult<()> {
        let mut created = Vec::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.space.is_some() {
                continue;
            }
            match runtime
                .create_action_space(session, entry.action)
                .op("xrCreateActionSpace")
            {
                Ok(space) => {
                    entry.space = Some(space);
                    created.push(index);
                }
                Err(err) => {
                    for index in created.into_iter().rev() {
                        if let Some(space) = self.entries[index].space.take() {
                            runtime.destroy_space(space);
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub fn release_spaces<R: XrRuntime + ?Sized>(&mut self, runtime: &mut R) {
        for entry in self.entries.iter_mut().rev() {
            if let Some(space) = entry.space.take() {
                runtime.destroy_space(space);
            }
        }
    }

    /// Drop every registration. Spaces must already be released.
    pub fn clear(&mut self) {
        if self.live_spaces() > 0 {
            tracing::warn!("clearing pose registrations with live spaces");
        }
        self.entries.clear();
    }

    /// Locate every pose space against `base` and write the result into its slot.
    ///
    /// A location without valid position and orientation leaves the slot untouched.
    pub fn update<R: XrRuntime + ?Sized>(
        &self,
        runtime: &R,
        base: SpaceHandle,
        time: Time,
        mut scene: Option<&mut dyn SceneTransforms>,
    ) -> XrResult<()> {
        for entry in &self.entries {
            let Some(space) = entry.space else {
                continue;
            };
            let location = runtime
                .locate_space(space, base, time)
                .op("xrLocateSpace")?;
            if !(location.position_valid && location.orientation_valid) {
                tracing::trace!(action = %entry.key, "pose not valid this frame");
                continue;
            }
            entry.slot.store(location);

            if let (Some(target), Some(scene)) = (entry.mirror.as_ref(), scene.as_deref_mut()) {
                let (position, orientation) = target.compose(&location.pose);
                scene.set_transform(target.entity, position, orientation);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    #[test]
    fn test_mirror_composition() {
        let tracked = Pose::from_glam(
            Vec3::new(0.1, 1.2, -0.3),
            Quat::from_rotation_y(FRAC_PI_2),
        );
        let target = MirrorTarget::new(EntityId(4))
            .with_offset(Vec3::new(1.0, 0.0, 2.0), Quat::from_rotation_x(FRAC_PI_2));
        let (position, orientation) = target.compose(&tracked);
        assert!(position.abs_diff_eq(Vec3::new(1.1, 1.2, 1.7), 1e-6));
        let expected = Quat::from_rotation_x(FRAC_PI_2) * Quat::from_rotation_y(FRAC_PI_2);
        assert!(orientation.abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn test_identity_offset_passes_pose_through() {
        let tracked = Pose::from_glam(Vec3::new(0.5, 1.0, 0.0), Quat::from_rotation_z(0.3));
        let (position, orientation) = MirrorTarget::new(EntityId(1)).compose(&tracked);
        assert_eq!(position, tracked.position());
        assert!(orientation.abs_diff_eq(tracked.orientation(), 1e-6));
    }

    #[test]
    fn test_register_rejects_duplicates_atomically() {
        let mut tracker = PoseTracker::new();
        let left = ActionKey::new("hands", "left_grip");
        let right = ActionKey::new("hands", "right_grip");
        tracker
            .register(vec![(left.clone(), ActionHandle::from_raw(1), None)])
            .unwrap();

        let err = tracker
            .register(vec![
                (right.clone(), ActionHandle::from_raw(2), None),
                (left.clone(), ActionHandle::from_raw(1), None),
            ])
            .unwrap_err();
        assert!(matches!(err, XrError::DuplicatePoseAction(_)));
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.contains(&right));
    }

    #[test]
    fn test_register_rejects_duplicate_within_batch() {
        let mut tracker = PoseTracker::new();
        let key = ActionKey::new("hands", "aim");
        let result = tracker.register(vec![
            (key.clone(), ActionHandle::from_raw(1), None),
            (key, ActionHandle::from_raw(1), None),
        ]);
        assert!(result.is_err());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_slot_starts_at_identity() {
        let slot = PoseSlot::default();
        assert_eq!(slot.pose(), Pose::IDENTITY);
        assert!(!slot.location().position_valid);
    }
}
