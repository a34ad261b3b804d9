//! Instance create-info chain nodes and the debug messenger callback.

use std::ffi::{c_void, CStr};
use std::ptr;

use halo_xr::{ChainArena, ChainEntry, DebugMessengerConfig};
use openxr as xr;
use xr::sys;
use xr::sys::Handle as _;

/// A native structure linked into `XrInstanceCreateInfo::next`.
pub enum ChainNode {
    DebugMessenger(sys::DebugUtilsMessengerCreateInfoEXT),
    #[cfg(target_os = "android")]
    AndroidLoader(sys::InstanceCreateInfoAndroidKHR),
}

impl ChainNode {
    fn as_next(&self) -> *const c_void {
        match self {
            ChainNode::DebugMessenger(info) => info as *const _ as *const c_void,
            #[cfg(target_os = "android")]
            ChainNode::AndroidLoader(info) => info as *const _ as *const c_void,
        }
    }
}

pub fn messenger_create_info(
    config: &DebugMessengerConfig,
    next: *const c_void,
) -> sys::DebugUtilsMessengerCreateInfoEXT {
    sys::DebugUtilsMessengerCreateInfoEXT {
        ty: sys::DebugUtilsMessengerCreateInfoEXT::TYPE,
        next,
        message_severities: sys::DebugUtilsMessageSeverityFlagsEXT::from_raw(u64::from(
            config.severities.bits(),
        )),
        message_types: sys::DebugUtilsMessageTypeFlagsEXT::from_raw(u64::from(
            config.message_types.bits(),
        )),
        user_callback: Some(debug_callback),
        user_data: ptr::null_mut(),
    }
}

/// Materialize `entries` into `arena` and return the head of the linked chain.
///
/// Each node points at the one pushed before it, so the arena must outlive the
/// create call that consumes the returned pointer.
pub fn build_chain(entries: &[ChainEntry], arena: &mut ChainArena<ChainNode>) -> *const c_void {
    let mut head: *const c_void = ptr::null();
    for entry in entries {
        let node = match entry {
            ChainEntry::DebugMessenger(config) => {
                ChainNode::DebugMessenger(messenger_create_info(config, head))
            }
            #[cfg(target_os = "android")]
            ChainEntry::AndroidLoader(loader) => {
                ChainNode::AndroidLoader(sys::InstanceCreateInfoAndroidKHR {
                    ty: sys::InstanceCreateInfoAndroidKHR::TYPE,
                    next: head,
                    application_vm: loader.vm as *mut c_void,
                    application_activity: loader.activity as *mut c_void,
                })
            }
            #[cfg(not(target_os = "android"))]
            ChainEntry::AndroidLoader(_) => {
                tracing::warn!("android loader chain entry ignored on this platform");
                continue;
            }
        };
        let pushed = arena.push(node);
        // SAFETY: `pushed` points into a box owned by `arena`, alive until it drops.
        head = unsafe { (*pushed).as_next() };
    }
    head
}

unsafe fn lossy(ptr: *const std::ffi::c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

unsafe extern "system" fn debug_callback(
    severity: sys::DebugUtilsMessageSeverityFlagsEXT,
    types: sys::DebugUtilsMessageTypeFlagsEXT,
    data: *const sys::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> sys::Bool32 {
    if data.is_null() {
        return sys::Bool32::from(false);
    }
    let data = &*data;
    let message = lossy(data.message);
    let function = lossy(data.function_name);
    let types = types.into_raw();

    if severity.contains(sys::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "openxr", function = %function, types, "{message}");
    } else if severity.contains(sys::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "openxr", function = %function, types, "{message}");
    } else if severity.contains(sys::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::info!(target: "openxr", function = %function, types, "{message}");
    } else {
        tracing::debug!(target: "openxr", function = %function, types, "{message}");
    }
    sys::Bool32::from(false)
}

/// Long-lived messenger created after the instance so runtime messages keep
/// flowing once the create-time chain is gone.
pub struct DebugMessenger {
    handle: sys::DebugUtilsMessengerEXT,
    destroy: xr::sys::pfn::DestroyDebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub fn create(instance: &xr::Instance, config: &DebugMessengerConfig) -> Option<Self> {
        let fns = instance.exts().ext_debug_utils.as_ref()?;
        let info = messenger_create_info(config, ptr::null());
        let mut handle = sys::DebugUtilsMessengerEXT::NULL;
        // SAFETY: the function table was loaded for this instance and `info` is fully initialized.
        let result =
            unsafe { (fns.create_debug_utils_messenger)(instance.as_raw(), &info, &mut handle) };
        if result.into_raw() < 0 {
            tracing::warn!(result = ?result, "failed to create debug messenger");
            return None;
        }
        Some(Self {
            handle,
            destroy: fns.destroy_debug_utils_messenger,
        })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        // SAFETY: created by this instance's debug utils table; the instance outlives us.
        unsafe {
            (self.destroy)(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo_xr::{DebugMessageTypes, DebugSeverity};

    #[test]
    fn test_chain_links_nodes_in_push_order() {
        let config = DebugMessengerConfig {
            severities: DebugSeverity::ERROR,
            message_types: DebugMessageTypes::VALIDATION,
        };
        let entries = [
            ChainEntry::DebugMessenger(DebugMessengerConfig::default()),
            ChainEntry::DebugMessenger(config),
        ];
        let mut arena = ChainArena::new();
        let head = build_chain(&entries, &mut arena);
        assert_eq!(arena.len(), 2);

        // SAFETY: both nodes are debug messenger infos owned by `arena`.
        let last = unsafe { &*(head as *const sys::DebugUtilsMessengerCreateInfoEXT) };
        assert_eq!(
            last.message_severities,
            sys::DebugUtilsMessageSeverityFlagsEXT::ERROR
        );
        assert_eq!(
            last.message_types,
            sys::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        );
        let first = unsafe { &*(last.next as *const sys::DebugUtilsMessengerCreateInfoEXT) };
        assert!(first.next.is_null());
        assert!(first
            .message_severities
            .contains(sys::DebugUtilsMessageSeverityFlagsEXT::WARNING));
    }

    #[test]
    fn test_empty_chain_has_null_head() {
        let mut arena = ChainArena::new();
        assert!(build_chain(&[], &mut arena).is_null());
        assert!(arena.is_empty());
    }

    #[cfg(not(target_os = "android"))]
    #[test]
    fn test_android_entry_skipped_off_android() {
        let mut arena = ChainArena::new();
        let entries = [ChainEntry::AndroidLoader(halo_xr::AndroidLoaderConfig {
            vm: 1,
            activity: 2,
        })];
        assert!(build_chain(&entries, &mut arena).is_null());
        assert!(arena.is_empty());
    }
}
