//! Runtime instance creation and the extensible instance configuration chain.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::capability::{Extension, NegotiatedCapabilitySet};
use crate::error::{XrError, XrResult};
use crate::runtime::{InstanceHandle, XrRuntime};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    pub name: String,
    pub version: u32,
    #[serde(default = "default_engine_name")]
    pub engine_name: String,
    #[serde(default)]
    pub engine_version: u32,
}

fn default_engine_name() -> String {
    "halo".to_string()
}

impl Default for ApplicationIdentity {
    fn default() -> Self {
        Self {
            name: "halo".to_string(),
            version: 1,
            engine_name: default_engine_name(),
            engine_version: 1,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DebugSeverity: u32 {
        const VERBOSE = 1 << 0;
        const INFO = 1 << 4;
        const WARNING = 1 << 8;
        const ERROR = 1 << 12;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DebugMessageTypes: u32 {
        const GENERAL = 1 << 0;
        const VALIDATION = 1 << 1;
        const PERFORMANCE = 1 << 2;
        const CONFORMANCE = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugMessengerConfig {
    pub severities: DebugSeverity,
    pub message_types: DebugMessageTypes,
}

impl Default for DebugMessengerConfig {
    fn default() -> Self {
        Self {
            severities: DebugSeverity::WARNING | DebugSeverity::ERROR,
            message_types: DebugMessageTypes::all(),
        }
    }
}

/// Android loader data (`JavaVM*` and activity `jobject`) as raw addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AndroidLoaderConfig {
    pub vm: usize,
    pub activity: usize,
}

/// One node of the instance configuration chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEntry {
    DebugMessenger(DebugMessengerConfig),
    AndroidLoader(AndroidLoaderConfig),
}

impl ChainEntry {
    /// Extension that must be negotiated for this entry to be honored.
    pub fn extension(&self) -> Extension {
        match self {
            ChainEntry::DebugMessenger(_) => Extension::ExtDebugUtils,
            ChainEntry::AndroidLoader(_) => Extension::KhrAndroidCreateInstance,
        }
    }
}

/// Accumulates chain entries; entries whose extension was not negotiated are
/// dropped at build time.
#[derive(Debug, Clone, Default)]
pub struct InstanceChainBuilder {
    entries: Vec<ChainEntry>,
}

impl InstanceChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entry: ChainEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn build(self, capabilities: &NegotiatedCapabilitySet) -> Vec<ChainEntry> {
        self.entries
            .into_iter()
            .filter(|entry| {
                let enabled = capabilities.has_extension(entry.extension());
                if !enabled {
                    tracing::debug!(
                        extension = entry.extension().name(),
                        "skipping chain entry, extension not negotiated"
                    );
                }
                enabled
            })
            .collect()
    }
}

/// Owns native chain nodes for the duration of a create call.
///
/// Nodes are boxed so their addresses stay stable while linked. Dropping the
/// arena releases every node in reverse allocation order, however many were
/// pushed before a failure.
pub struct ChainArena<T> {
    nodes: Vec<Box<T>>,
}

impl<T> ChainArena<T> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Store `node` and return a stable pointer to it.
    pub fn push(&mut self, node: T) -> *mut T {
        let mut boxed = Box::new(node);
        let ptr: *mut T = &mut *boxed;
        self.nodes.push(boxed);
        ptr
    }

    /// Pointer to the most recently pushed node, or null when empty.
    pub fn head(&self) -> *const T {
        self.nodes
            .last()
            .map(|node| &**node as *const T)
            .unwrap_or(std::ptr::null())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<T> Default for ChainArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ChainArena<T> {
    fn drop(&mut self) {
        while let Some(node) = self.nodes.pop() {
            drop(node);
        }
    }
}

/// Everything the runtime needs to create an instance.
#[derive(Debug, Clone, Copy)]
pub struct InstanceCreateDesc<'a> {
    pub identity: &'a ApplicationIdentity,
    pub capabilities: &'a NegotiatedCapabilitySet,
    pub chain: &'a [ChainEntry],
}

/// A live runtime instance and the capabilities it was created with.
#[derive(Debug)]
pub struct RuntimeInstance {
    handle: InstanceHandle,
    capabilities: NegotiatedCapabilitySet,
}

impl RuntimeInstance {
    pub fn create<R: XrRuntime + ?Sized>(
        runtime: &mut R,
        capabilities: NegotiatedCapabilitySet,
        identity: &ApplicationIdentity,
        chain: InstanceChainBuilder,
    ) -> XrResult<Self> {
        let chain = chain.build(&capabilities);
        let desc = InstanceCreateDesc {
            identity,
            capabilities: &capabilities,
            chain: &chain,
        };
        let handle = runtime.create_instance(&desc).map_err(|code| {
            tracing::error!(op = "xrCreateInstance", result = %code.name, raw = code.raw, "runtime call failed");
            XrError::instance_creation(code)
        })?;
        tracing::info!(
            application = %identity.name,
            extensions = ?capabilities.extension_names(),
            layers = ?capabilities.layer_names(),
            "runtime instance created"
        );
        Ok(Self {
            handle,
            capabilities,
        })
    }

    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    pub fn capabilities(&self) -> &NegotiatedCapabilitySet {
        &self.capabilities
    }

    pub fn destroy<R: XrRuntime + ?Sized>(self, runtime: &mut R) {
        runtime.destroy_instance(self.handle);
        tracing::info!("runtime instance destroyed");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::capability::{negotiate_against, Feature, FeatureList};

    struct Recorder {
        id: u32,
        log: Rc<RefCell<Vec<u32>>>,
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            self.log.borrow_mut().push(self.id);
        }
    }

    #[test]
    fn test_chain_arena_releases_in_reverse_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let mut arena = ChainArena::new();
            for id in 0..3 {
                arena.push(Recorder {
                    id,
                    log: log.clone(),
                });
            }
            assert_eq!(arena.len(), 3);
        }
        assert_eq!(*log.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn test_chain_arena_partial_build_is_released() {
        fn build(log: Rc<RefCell<Vec<u32>>>, fail_at: u32) -> Result<ChainArena<Recorder>, u32> {
            let mut arena = ChainArena::new();
            for id in 0..4 {
                if id == fail_at {
                    return Err(id);
                }
                arena.push(Recorder {
                    id,
                    log: log.clone(),
                });
            }
            Ok(arena)
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        assert_eq!(build(log.clone(), 2).err(), Some(2));
        assert_eq!(*log.borrow(), vec![1, 0]);
    }

    #[test]
    fn test_chain_arena_head_tracks_last_node() {
        let mut arena: ChainArena<u32> = ChainArena::new();
        assert!(arena.head().is_null());
        arena.push(1u32);
        let second = arena.push(2u32);
        assert_eq!(arena.head(), second as *const u32);
    }

    #[test]
    fn test_chain_builder_skips_unnegotiated_entries() {
        let requested = FeatureList::new().request(Feature::Extension(Extension::ExtDebugUtils));
        let caps =
            negotiate_against(&requested, &[], &["XR_EXT_debug_utils".to_string()]).unwrap();
        let chain = InstanceChainBuilder::new()
            .with(ChainEntry::AndroidLoader(AndroidLoaderConfig { vm: 1, activity: 2 }))
            .with(ChainEntry::DebugMessenger(DebugMessengerConfig::default()))
            .build(&caps);
        assert_eq!(
            chain,
            vec![ChainEntry::DebugMessenger(DebugMessengerConfig::default())]
        );
    }
}
