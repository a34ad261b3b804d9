//! Vulkan instance and device creation through `XR_KHR_vulkan_enable2`.
//!
//! The runtime owns the create calls so it can inject the layers and
//! extensions it needs. Handles handed back to the core are the native
//! `VkInstance`/`VkPhysicalDevice`/`VkDevice` values.

use std::collections::HashMap;
use std::ffi::{c_char, CStr, CString};

use ash::vk::{self, Handle as _};
use halo_xr::{
    ApiVersionRange, GpuCreateOutcome, GpuDeviceDesc, GpuDeviceHandle, GpuInstanceDesc,
    GpuInstanceHandle, PhysicalDeviceHandle, PhysicalDeviceInfo, QueueFamilyInfo, ResultCode,
    RtResult,
};
use openxr as xr;

use crate::convert::{api_version_from_xr, vk_api_version, vk_code, xr_code};
use crate::error::BackendError;

fn cstrings(names: &[String]) -> RtResult<Vec<CString>> {
    names
        .iter()
        .map(|name| {
            CString::new(name.as_str())
                .map_err(|_| vk_code(vk::Result::ERROR_INITIALIZATION_FAILED.as_raw()))
        })
        .collect()
}

fn pointers(names: &[CString]) -> Vec<*const c_char> {
    names.iter().map(|name| name.as_ptr()).collect()
}

fn missing_handle() -> ResultCode {
    xr_code(xr::sys::Result::ERROR_HANDLE_INVALID)
}

/// GPU objects created through one XR instance.
pub struct VulkanInterop {
    entry: ash::Entry,
    instances: HashMap<GpuInstanceHandle, ash::Instance>,
    physical_devices: HashMap<PhysicalDeviceHandle, GpuInstanceHandle>,
    devices: HashMap<GpuDeviceHandle, ash::Device>,
}

impl VulkanInterop {
    pub fn load() -> Result<Self, BackendError> {
        // SAFETY: loading the system Vulkan loader has no preconditions beyond it being a
        // well-behaved shared library.
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BackendError::VulkanLoad(e.to_string()))?;
        Ok(Self {
            entry,
            instances: HashMap::new(),
            physical_devices: HashMap::new(),
            devices: HashMap::new(),
        })
    }

    pub fn requirements(
        xr_instance: &xr::Instance,
        system: xr::SystemId,
    ) -> RtResult<ApiVersionRange> {
        let reqs = xr_instance
            .graphics_requirements::<xr::Vulkan>(system)
            .map_err(xr_code)?;
        Ok(ApiVersionRange {
            min: api_version_from_xr(reqs.min_api_version_supported),
            max: api_version_from_xr(reqs.max_api_version_supported),
        })
    }

    fn get_instance_proc_addr(&self) -> xr::sys::platform::VkGetInstanceProcAddr {
        // SAFETY: both types describe vkGetInstanceProcAddr; they differ only in how the
        // handle parameter is spelled.
        unsafe { std::mem::transmute(self.entry.static_fn().get_instance_proc_addr) }
    }

    pub fn create_instance(
        &mut self,
        xr_instance: &xr::Instance,
        system: xr::SystemId,
        desc: &GpuInstanceDesc,
    ) -> GpuCreateOutcome<GpuInstanceHandle> {
        let names = match (
            CString::new(desc.application_name.as_str()),
            CString::new(desc.engine_name.as_str()),
            cstrings(&desc.extensions),
            cstrings(&desc.layers),
        ) {
            (Ok(app), Ok(engine), Ok(exts), Ok(layers)) => (app, engine, exts, layers),
            _ => {
                return GpuCreateOutcome {
                    handle: None,
                    runtime: Ok(()),
                    gpu: Err(vk_code(vk::Result::ERROR_INITIALIZATION_FAILED.as_raw())),
                }
            }
        };
        let (app_name, engine_name, extensions, layers) = names;
        let extension_ptrs = pointers(&extensions);
        let layer_ptrs = pointers(&layers);

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(desc.application_version)
            .engine_name(&engine_name)
            .engine_version(desc.engine_version)
            .api_version(vk_api_version(desc.api_version));
        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        // SAFETY: `create_info` and everything it points at live until the call returns.
        let result = unsafe {
            xr_instance.create_vulkan_instance(
                system,
                self.get_instance_proc_addr(),
                &*create_info as *const vk::InstanceCreateInfo as *const _,
            )
        };
        match result {
            Err(code) => GpuCreateOutcome::runtime_failure(xr_code(code)),
            Ok(Err(vk_result)) => GpuCreateOutcome {
                handle: None,
                runtime: Ok(()),
                gpu: Err(vk_code(vk_result)),
            },
            Ok(Ok(raw)) => {
                let raw = vk::Instance::from_raw(raw as u64);
                // SAFETY: `raw` is a live instance created by the loader behind `self.entry`.
                let instance = unsafe { ash::Instance::load(self.entry.static_fn(), raw) };
                let handle = GpuInstanceHandle::from_raw(raw.as_raw());
                self.instances.insert(handle, instance);
                GpuCreateOutcome::success(handle)
            }
        }
    }

    pub fn physical_device(
        &mut self,
        xr_instance: &xr::Instance,
        system: xr::SystemId,
        gpu_instance: GpuInstanceHandle,
    ) -> RtResult<PhysicalDeviceInfo> {
        let instance = self.instances.get(&gpu_instance).ok_or_else(missing_handle)?;
        // SAFETY: `instance` is live and was created for this system.
        let raw = unsafe {
            xr_instance.vulkan_graphics_device(system, instance.handle().as_raw() as _)
        }
        .map_err(xr_code)?;
        let physical = vk::PhysicalDevice::from_raw(raw as u64);

        // SAFETY: `physical` was enumerated from `instance`.
        let (properties, families) = unsafe {
            (
                instance.get_physical_device_properties(physical),
                instance.get_physical_device_queue_family_properties(physical),
            )
        };
        // SAFETY: the driver NUL-terminates device_name.
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let handle = PhysicalDeviceHandle::from_raw(physical.as_raw());
        self.physical_devices.insert(handle, gpu_instance);

        Ok(PhysicalDeviceInfo {
            handle,
            name,
            queue_families: families
                .iter()
                .map(|family| QueueFamilyInfo {
                    graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                    queue_count: family.queue_count,
                })
                .collect(),
        })
    }

    pub fn create_device(
        &mut self,
        xr_instance: &xr::Instance,
        system: xr::SystemId,
        physical_device: PhysicalDeviceHandle,
        desc: &GpuDeviceDesc,
    ) -> GpuCreateOutcome<GpuDeviceHandle> {
        let Some(instance) = self
            .physical_devices
            .get(&physical_device)
            .and_then(|owner| self.instances.get(owner))
        else {
            return GpuCreateOutcome::runtime_failure(missing_handle());
        };
        let Ok(extensions) = cstrings(&desc.extensions) else {
            return GpuCreateOutcome {
                handle: None,
                runtime: Ok(()),
                gpu: Err(vk_code(vk::Result::ERROR_EXTENSION_NOT_PRESENT.as_raw())),
            };
        };
        let extension_ptrs = pointers(&extensions);
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(desc.queue_family_index.unwrap_or(0))
            .queue_priorities(&desc.queue_priorities)
            .build()];
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs);

        // SAFETY: `create_info` and its arrays outlive the call; `physical_device` belongs
        // to `instance`.
        let result = unsafe {
            xr_instance.create_vulkan_device(
                system,
                self.get_instance_proc_addr(),
                physical_device.into_raw() as _,
                &*create_info as *const vk::DeviceCreateInfo as *const _,
            )
        };
        match result {
            Err(code) => GpuCreateOutcome::runtime_failure(xr_code(code)),
            Ok(Err(vk_result)) => GpuCreateOutcome {
                handle: None,
                runtime: Ok(()),
                gpu: Err(vk_code(vk_result)),
            },
            Ok(Ok(raw)) => {
                let raw = vk::Device::from_raw(raw as u64);
                // SAFETY: `raw` is a live device created from `instance`.
                let device = unsafe { ash::Device::load(instance.fp_v1_0(), raw) };
                let handle = GpuDeviceHandle::from_raw(raw.as_raw());
                self.devices.insert(handle, device);
                GpuCreateOutcome::success(handle)
            }
        }
    }

    pub fn destroy_device(&mut self, device: GpuDeviceHandle) {
        if let Some(device) = self.devices.remove(&device) {
            // SAFETY: the session using this device has been destroyed by the caller.
            unsafe {
                if let Err(e) = device.device_wait_idle() {
                    tracing::warn!("vkDeviceWaitIdle before destroy failed: {e}");
                }
                device.destroy_device(None);
            }
        }
    }

    pub fn destroy_instance(&mut self, gpu_instance: GpuInstanceHandle) {
        self.physical_devices
            .retain(|_, owner| *owner != gpu_instance);
        if let Some(instance) = self.instances.remove(&gpu_instance) {
            // SAFETY: every device created from this instance is destroyed first.
            unsafe { instance.destroy_instance(None) };
        }
    }

    /// Release everything still alive, devices first.
    pub fn clear(&mut self) {
        let devices: Vec<_> = self.devices.keys().copied().collect();
        for device in devices {
            self.destroy_device(device);
        }
        let instances: Vec<_> = self.instances.keys().copied().collect();
        for instance in instances {
            self.destroy_instance(instance);
        }
    }

    pub fn instance(&self, handle: GpuInstanceHandle) -> Option<&ash::Instance> {
        self.instances.get(&handle)
    }

    pub fn device(&self, handle: GpuDeviceHandle) -> Option<&ash::Device> {
        self.devices.get(&handle)
    }
}

impl Drop for VulkanInterop {
    fn drop(&mut self) {
        self.clear();
    }
}
