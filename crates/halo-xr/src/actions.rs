//! Action sets, actions and interaction-profile binding suggestions.

use std::collections::HashMap;
use std::fmt;

use crate::error::{RtResultExt, XrError, XrResult};
use crate::runtime::{ActionHandle, ActionSetHandle, InstanceHandle, SessionHandle, XrRuntime};
use crate::session::SessionState;
use crate::types::{ActionKind, ActionState};

/// Identifies an action by its set and its own name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionKey {
    pub action_set: String,
    pub action: String,
}

impl ActionKey {
    pub fn new(action_set: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            action_set: action_set.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.action_set, self.action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSuggestion {
    pub action: ActionKey,
    pub path: String,
}

impl BindingSuggestion {
    pub fn new(action: ActionKey, path: impl Into<String>) -> Self {
        Self {
            action,
            path: path.into(),
        }
    }
}

pub const KHR_SIMPLE_CONTROLLER: &str = "/interaction_profiles/khr/simple_controller";
pub const OCULUS_TOUCH_CONTROLLER: &str = "/interaction_profiles/oculus/touch_controller";
pub const VALVE_INDEX_CONTROLLER: &str = "/interaction_profiles/valve/index_controller";
pub const MICROSOFT_MOTION_CONTROLLER: &str = "/interaction_profiles/microsoft/motion_controller";
pub const HTC_VIVE_CONTROLLER: &str = "/interaction_profiles/htc/vive_controller";

const SIMPLE_CONTROLLER_PATHS: &[&str] = &[
    "/user/hand/left/input/select/click",
    "/user/hand/right/input/select/click",
    "/user/hand/left/input/menu/click",
    "/user/hand/right/input/menu/click",
    "/user/hand/left/input/grip/pose",
    "/user/hand/right/input/grip/pose",
    "/user/hand/left/input/aim/pose",
    "/user/hand/right/input/aim/pose",
    "/user/hand/left/output/haptic",
    "/user/hand/right/output/haptic",
];

const TOUCH_CONTROLLER_PATHS: &[&str] = &[
    "/user/hand/left/input/x/click",
    "/user/hand/left/input/x/touch",
    "/user/hand/left/input/y/click",
    "/user/hand/left/input/y/touch",
    "/user/hand/left/input/menu/click",
    "/user/hand/right/input/a/click",
    "/user/hand/right/input/a/touch",
    "/user/hand/right/input/b/click",
    "/user/hand/right/input/b/touch",
    "/user/hand/right/input/system/click",
    "/user/hand/left/input/squeeze/value",
    "/user/hand/right/input/squeeze/value",
    "/user/hand/left/input/trigger/value",
    "/user/hand/right/input/trigger/value",
    "/user/hand/left/input/trigger/touch",
    "/user/hand/right/input/trigger/touch",
    "/user/hand/left/input/thumbstick",
    "/user/hand/right/input/thumbstick",
    "/user/hand/left/input/thumbstick/click",
    "/user/hand/right/input/thumbstick/click",
    "/user/hand/left/input/thumbstick/touch",
    "/user/hand/right/input/thumbstick/touch",
    "/user/hand/left/input/grip/pose",
    "/user/hand/right/input/grip/pose",
    "/user/hand/left/input/aim/pose",
    "/user/hand/right/input/aim/pose",
    "/user/hand/left/output/haptic",
    "/user/hand/right/output/haptic",
];

const INDEX_CONTROLLER_PATHS: &[&str] = &[
    "/user/hand/left/input/a/click",
    "/user/hand/right/input/a/click",
    "/user/hand/left/input/b/click",
    "/user/hand/right/input/b/click",
    "/user/hand/left/input/system/click",
    "/user/hand/right/input/system/click",
    "/user/hand/left/input/squeeze/value",
    "/user/hand/right/input/squeeze/value",
    "/user/hand/left/input/squeeze/force",
    "/user/hand/right/input/squeeze/force",
    "/user/hand/left/input/trigger/click",
    "/user/hand/right/input/trigger/click",
    "/user/hand/left/input/trigger/value",
    "/user/hand/right/input/trigger/value",
    "/user/hand/left/input/thumbstick",
    "/user/hand/right/input/thumbstick",
    "/user/hand/left/input/thumbstick/click",
    "/user/hand/right/input/thumbstick/click",
    "/user/hand/left/input/trackpad",
    "/user/hand/right/input/trackpad",
    "/user/hand/left/input/grip/pose",
    "/user/hand/right/input/grip/pose",
    "/user/hand/left/input/aim/pose",
    "/user/hand/right/input/aim/pose",
    "/user/hand/left/output/haptic",
    "/user/hand/right/output/haptic",
];

const MOTION_CONTROLLER_PATHS: &[&str] = &[
    "/user/hand/left/input/menu/click",
    "/user/hand/right/input/menu/click",
    "/user/hand/left/input/squeeze/click",
    "/user/hand/right/input/squeeze/click",
    "/user/hand/left/input/trigger/value",
    "/user/hand/right/input/trigger/value",
    "/user/hand/left/input/thumbstick",
    "/user/hand/right/input/thumbstick",
    "/user/hand/left/input/thumbstick/click",
    "/user/hand/right/input/thumbstick/click",
    "/user/hand/left/input/trackpad",
    "/user/hand/right/input/trackpad",
    "/user/hand/left/input/trackpad/click",
    "/user/hand/right/input/trackpad/click",
    "/user/hand/left/input/grip/pose",
    "/user/hand/right/input/grip/pose",
    "/user/hand/left/input/aim/pose",
    "/user/hand/right/input/aim/pose",
    "/user/hand/left/output/haptic",
    "/user/hand/right/output/haptic",
];

const VIVE_CONTROLLER_PATHS: &[&str] = &[
    "/user/hand/left/input/system/click",
    "/user/hand/right/input/system/click",
    "/user/hand/left/input/squeeze/click",
    "/user/hand/right/input/squeeze/click",
    "/user/hand/left/input/menu/click",
    "/user/hand/right/input/menu/click",
    "/user/hand/left/input/trigger/click",
    "/user/hand/right/input/trigger/click",
    "/user/hand/left/input/trigger/value",
    "/user/hand/right/input/trigger/value",
    "/user/hand/left/input/trackpad",
    "/user/hand/right/input/trackpad",
    "/user/hand/left/input/trackpad/click",
    "/user/hand/right/input/trackpad/click",
    "/user/hand/left/input/trackpad/touch",
    "/user/hand/right/input/trackpad/touch",
    "/user/hand/left/input/grip/pose",
    "/user/hand/right/input/grip/pose",
    "/user/hand/left/input/aim/pose",
    "/user/hand/right/input/aim/pose",
    "/user/hand/left/output/haptic",
    "/user/hand/right/output/haptic",
];

/// Binding paths an interaction profile declares, or `None` for unknown profiles.
pub fn supported_binding_paths(profile: &str) -> Option<&'static [&'static str]> {
    match profile {
        KHR_SIMPLE_CONTROLLER => Some(SIMPLE_CONTROLLER_PATHS),
        OCULUS_TOUCH_CONTROLLER => Some(TOUCH_CONTROLLER_PATHS),
        VALVE_INDEX_CONTROLLER => Some(INDEX_CONTROLLER_PATHS),
        MICROSOFT_MOTION_CONTROLLER => Some(MOTION_CONTROLLER_PATHS),
        HTC_VIVE_CONTROLLER => Some(VIVE_CONTROLLER_PATHS),
        _ => None,
    }
}

/// Drop every suggestion whose path the profile does not declare.
pub fn filter_bindings<'a>(
    profile: &str,
    bindings: &'a [BindingSuggestion],
) -> Vec<&'a BindingSuggestion> {
    let allowed = supported_binding_paths(profile).unwrap_or(&[]);
    bindings
        .iter()
        .filter(|binding| {
            let keep = allowed.contains(&binding.path.as_str());
            if !keep {
                tracing::warn!(
                    profile,
                    path = %binding.path,
                    action = %binding.action,
                    "binding path not supported by interaction profile, dropping"
                );
            }
            keep
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct ActionEntry {
    handle: ActionHandle,
    kind: ActionKind,
}

/// Instance-scoped registry of action sets and actions plus per-session attachment.
#[derive(Debug, Default)]
pub struct ActionBindingRegistry {
    sets: Vec<(String, ActionSetHandle)>,
    actions: HashMap<ActionKey, ActionEntry>,
    /// Sets to attach at session start; empty means all sets.
    attach_request: Vec<String>,
    attached: Option<SessionHandle>,
}

impl ActionBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_handle(&self, name: &str) -> Option<ActionSetHandle> {
        self.sets
            .iter()
            .find(|(set, _)| set == name)
            .map(|(_, handle)| *handle)
    }

    pub fn create_action_set<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> XrResult<ActionSetHandle> {
        if self.set_handle(name).is_some() {
            return Err(XrError::invalid_state(format!(
                "action set '{name}' already exists"
            )));
        }
        let handle = runtime
            .create_action_set(instance, name, localized_name, priority)
            .op("xrCreateActionSet")?;
        self.sets.push((name.to_string(), handle));
        Ok(handle)
    }

    pub fn create_action<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        key: ActionKey,
        localized_name: &str,
        kind: ActionKind,
        subaction_paths: &[String],
    ) -> XrResult<ActionHandle> {
        let set = self
            .set_handle(&key.action_set)
            .ok_or_else(|| XrError::UnknownAction(format!("no action set '{}'", key.action_set)))?;
        if self.actions.contains_key(&key) {
            return Err(XrError::invalid_state(format!("action '{key}' already exists")));
        }
        let handle = runtime
            .create_action(set, &key.action, localized_name, kind, subaction_paths)
            .op("xrCreateAction")?;
        self.actions.insert(key, ActionEntry { handle, kind });
        Ok(handle)
    }

    pub fn action(&self, key: &ActionKey) -> Option<(ActionHandle, ActionKind)> {
        self.actions.get(key).map(|entry| (entry.handle, entry.kind))
    }

    /// Suggest bindings for one profile, filtered to the paths the profile supports.
    ///
    /// Returns how many bindings were submitted.
    pub fn suggest_bindings<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        profile: &str,
        bindings: &[BindingSuggestion],
    ) -> XrResult<usize> {
        if supported_binding_paths(profile).is_none() {
            tracing::warn!(profile, "unknown interaction profile, no bindings suggested");
            return Ok(0);
        }
        let mut resolved = Vec::with_capacity(bindings.len());
        for binding in filter_bindings(profile, bindings) {
            let entry = self
                .actions
                .get(&binding.action)
                .ok_or_else(|| XrError::UnknownAction(binding.action.to_string()))?;
            resolved.push((entry.handle, binding.path.clone()));
        }
        if resolved.is_empty() {
            tracing::warn!(profile, "every suggested binding was filtered out");
            return Ok(0);
        }
        runtime
            .suggest_interaction_profile_bindings(instance, profile, &resolved)
            .op("xrSuggestInteractionProfileBindings")?;
        tracing::debug!(profile, count = resolved.len(), "bindings suggested");
        Ok(resolved.len())
    }

    /// Choose which sets get attached when a session starts.
    pub fn request_attach(&mut self, sets: &[&str]) -> XrResult<()> {
        for name in sets {
            if self.set_handle(name).is_none() {
                return Err(XrError::UnknownAction(format!("no action set '{name}'")));
            }
        }
        self.attach_request = sets.iter().map(|s| s.to_string()).collect();
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// Attach the requested sets to `session`. Runs once per session.
    pub fn attach<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        session: SessionHandle,
    ) -> XrResult<()> {
        if self.attached == Some(session) {
            return Ok(());
        }
        let handles: Vec<ActionSetHandle> = if self.attach_request.is_empty() {
            self.sets.iter().map(|(_, handle)| *handle).collect()
        } else {
            self.attach_request
                .iter()
                .filter_map(|name| self.set_handle(name))
                .collect()
        };
        if handles.is_empty() {
            return Ok(());
        }
        runtime
            .attach_action_sets(session, &handles)
            .op("xrAttachSessionActionSets")?;
        self.attached = Some(session);
        tracing::debug!(sets = handles.len(), "action sets attached");
        Ok(())
    }

    pub fn detach(&mut self) {
        self.attached = None;
    }

    /// Sync the named sets. No-op unless the session is active and sets are attached.
    pub fn sync_actions<R: XrRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        session: SessionHandle,
        state: SessionState,
        active_sets: &[&str],
    ) -> XrResult<()> {
        if !state.is_active() || self.attached != Some(session) {
            return Ok(());
        }
        let mut handles = Vec::with_capacity(active_sets.len());
        for name in active_sets {
            let handle = self
                .set_handle(name)
                .ok_or_else(|| XrError::UnknownAction(format!("no action set '{name}'")))?;
            handles.push(handle);
        }
        runtime.sync_actions(session, &handles).op("xrSyncActions")
    }

    pub fn action_state<R: XrRuntime + ?Sized>(
        &self,
        runtime: &R,
        session: SessionHandle,
        key: &ActionKey,
    ) -> XrResult<ActionState> {
        let entry = self
            .actions
            .get(key)
            .ok_or_else(|| XrError::UnknownAction(key.to_string()))?;
        runtime
            .action_state(session, entry.handle)
            .op("xrGetActionState")
    }

    /// Destroy all sets. Actions go with their sets.
    pub fn clear<R: XrRuntime + ?Sized>(&mut self, runtime: &mut R) {
        self.actions.clear();
        self.attach_request.clear();
        self.attached = None;
        for (_, handle) in self.sets.drain(..).rev() {
            runtime.destroy_action_set(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_drops_unsupported_paths() {
        let trigger = ActionKey::new("gameplay", "trigger");
        let bindings = vec![
            BindingSuggestion::new(trigger.clone(), "/user/hand/left/input/trigger/value"),
            BindingSuggestion::new(trigger.clone(), "/user/hand/left/input/select/click"),
        ];
        let kept = filter_bindings(OCULUS_TOUCH_CONTROLLER, &bindings);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path, "/user/hand/left/input/trigger/value");

        let kept = filter_bindings(KHR_SIMPLE_CONTROLLER, &bindings);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path, "/user/hand/left/input/select/click");
    }

    #[test]
    fn test_unknown_profile_supports_nothing() {
        assert!(supported_binding_paths("/interaction_profiles/acme/stick").is_none());
        let bindings = vec![BindingSuggestion::new(
            ActionKey::new("a", "b"),
            "/user/hand/left/input/grip/pose",
        )];
        assert!(filter_bindings("/interaction_profiles/acme/stick", &bindings).is_empty());
    }

    #[test]
    fn test_every_profile_declares_grip_pose() {
        for profile in [
            KHR_SIMPLE_CONTROLLER,
            OCULUS_TOUCH_CONTROLLER,
            VALVE_INDEX_CONTROLLER,
            MICROSOFT_MOTION_CONTROLLER,
            HTC_VIVE_CONTROLLER,
        ] {
            let paths = supported_binding_paths(profile).unwrap();
            assert!(paths.contains(&"/user/hand/left/input/grip/pose"), "{profile}");
            assert!(paths.contains(&"/user/hand/right/input/grip/pose"), "{profile}");
        }
    }

    #[test]
    fn test_action_key_display() {
        assert_eq!(ActionKey::new("hands", "left_grip").to_string(), "hands/left_grip");
        assert_ne!(ActionKey::new("ab", "c"), ActionKey::new("a", "bc"));
    }
}
