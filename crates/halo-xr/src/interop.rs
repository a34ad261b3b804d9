//! GPU instance/device creation mediated by the runtime.
//!
//! The runtime injects its own required layers and extensions into the
//! create structs, so the GPU objects are always created through its factory
//! functions and never directly through the GPU API.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{runtime_failure, RtResultExt, XrError, XrResult};
use crate::runtime::{
    GpuCreateOutcome, GpuDeviceHandle, GpuInstanceHandle, InstanceHandle, PhysicalDeviceHandle,
    SystemId, XrRuntime,
};

/// GPU API version. Field order gives the correct lexicographic ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
    #[serde(default)]
    pub patch: u32,
}

impl ApiVersion {
    pub const fn new(major: u16, minor: u16, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The runtime's supported GPU API window, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersionRange {
    pub min: ApiVersion,
    pub max: ApiVersion,
}

/// Clamp `desired` into `range`.
pub fn clamp_api_version(desired: ApiVersion, range: ApiVersionRange) -> ApiVersion {
    if desired < range.min {
        range.min
    } else if desired > range.max {
        range.max
    } else {
        desired
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInstanceDesc {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    pub api_version: ApiVersion,
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpuDeviceDesc {
    /// `None` selects the first graphics-capable family.
    pub queue_family_index: Option<u32>,
    pub queue_priorities: Vec<f32>,
    pub extensions: Vec<String>,
}

impl Default for GpuDeviceDesc {
    fn default() -> Self {
        Self {
            queue_family_index: None,
            queue_priorities: vec![1.0],
            extensions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub graphics: bool,
    pub queue_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDeviceInfo {
    pub handle: PhysicalDeviceHandle,
    pub name: String,
    pub queue_families: Vec<QueueFamilyInfo>,
}

impl PhysicalDeviceInfo {
    pub fn graphics_queue_family(&self) -> Option<u32> {
        self.queue_families
            .iter()
            .position(|family| family.graphics && family.queue_count > 0)
            .map(|index| index as u32)
    }
}

/// The GPU objects a session is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsBinding {
    pub instance: GpuInstanceHandle,
    pub physical_device: PhysicalDeviceHandle,
    pub device: GpuDeviceHandle,
    pub queue_family_index: u32,
    pub queue_index: u32,
}

/// Combine the two halves of a create call; any failure rolls back the partial handle.
fn settle<H: Copy, R: XrRuntime + ?Sized>(
    runtime: &mut R,
    op: &'static str,
    outcome: GpuCreateOutcome<H>,
    rollback: impl FnOnce(&mut R, H),
) -> XrResult<H> {
    let failure = match (&outcome.runtime, &outcome.gpu, outcome.handle) {
        (Ok(()), Ok(()), Some(handle)) => return Ok(handle),
        (Err(code), _, _) => runtime_failure(op, code.clone()),
        (_, Err(code), _) => {
            tracing::error!(op, result = %code.name, raw = code.raw, "GPU half of create call failed");
            XrError::interop(format!("{op}: {code}"))
        }
        (Ok(()), Ok(()), None) => XrError::interop(format!("{op} returned no handle")),
    };
    if let Some(handle) = outcome.handle {
        tracing::warn!(op, "rolling back partially created GPU object");
        rollback(runtime, handle);
    }
    Err(failure)
}

/// Tracks the GPU objects created through the runtime for one instance.
#[derive(Debug, Default)]
pub struct DeviceInteropBridge {
    requirements: Option<ApiVersionRange>,
    gpu_instance: Option<GpuInstanceHandle>,
    physical_device: Option<PhysicalDeviceInfo>,
    device: Option<(GpuDeviceHandle, u32)>,
    binding: Option<GraphicsBinding>,
}

impl DeviceInteropBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp `desired` to the runtime's supported window.
    pub fn negotiate_api_version<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &R,
        instance: InstanceHandle,
        system: SystemId,
        desired: ApiVersion,
    ) -> XrResult<ApiVersion> {
        let range = match self.requirements {
            Some(range) => range,
            None => {
                let range = runtime
                    .graphics_requirements(instance, system)
                    .op("xrGetVulkanGraphicsRequirements2KHR")?;
                self.requirements = Some(range);
                range
            }
        };
        let clamped = clamp_api_version(desired, range);
        if clamped != desired {
            tracing::warn!(
                %desired,
                %clamped,
                min = %range.min,
                max = %range.max,
                "GPU API version outside runtime window, clamped"
            );
        }
        Ok(clamped)
    }

    pub fn create_gpu_instance<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        system: SystemId,
        mut desc: GpuInstanceDesc,
    ) -> XrResult<GpuInstanceHandle> {
        if self.gpu_instance.is_some() {
            return Err(XrError::invalid_state("GPU instance already created"));
        }
        desc.api_version = self.negotiate_api_version(runtime, instance, system, desc.api_version)?;
        let outcome = runtime.create_gpu_instance(instance, system, &desc);
        let handle = settle(runtime, "xrCreateVulkanInstanceKHR", outcome, |rt, h| {
            rt.destroy_gpu_instance(h)
        })?;
        tracing::info!(api_version = %desc.api_version, "GPU instance created through runtime");
        self.gpu_instance = Some(handle);
        Ok(handle)
    }

    pub fn select_physical_device<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<&PhysicalDeviceInfo> {
        let gpu_instance = self
            .gpu_instance
            .ok_or_else(|| XrError::invalid_state("GPU instance not created"))?;
        let info = runtime
            .gpu_physical_device(instance, system, gpu_instance)
            .op("xrGetVulkanGraphicsDevice2KHR")?;
        tracing::info!(device = %info.name, "physical device selected by runtime");
        Ok(self.physical_device.insert(info))
    }

    pub fn create_gpu_device<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        system: SystemId,
        mut desc: GpuDeviceDesc,
    ) -> XrResult<GpuDeviceHandle> {
        if self.device.is_some() {
            return Err(XrError::invalid_state("GPU device already created"));
        }
        let physical = self
            .physical_device
            .as_ref()
            .ok_or_else(|| XrError::invalid_state("physical device not selected"))?;
        let family = match desc.queue_family_index {
            Some(family) => family,
            None => physical
                .graphics_queue_family()
                .ok_or_else(|| XrError::interop("no graphics queue family"))?,
        };
        desc.queue_family_index = Some(family);
        if desc.queue_priorities.is_empty() {
            desc.queue_priorities.push(1.0);
        }
        let physical_handle = physical.handle;

        let outcome = runtime.create_gpu_device(instance, system, physical_handle, &desc);
        let handle = settle(runtime, "xrCreateVulkanDeviceKHR", outcome, |rt, h| {
            rt.destroy_gpu_device(h)
        })?;
        tracing::info!(queue_family = family, "GPU device created through runtime");
        self.device = Some((handle, family));
        Ok(handle)
    }

    /// Fix the graphics binding for session creation. Allowed once per instance.
    pub fn set_graphics_binding(&mut self, queue_index: u32) -> XrResult<GraphicsBinding> {
        if self.binding.is_some() {
            return Err(XrError::invalid_state("graphics binding already set"));
        }
        let (instance, physical_device, (device, queue_family_index)) =
            match (self.gpu_instance, self.physical_device.as_ref(), self.device) {
                (Some(i), Some(p), Some(d)) => (i, p.handle, d),
                _ => return Err(XrError::invalid_state("GPU device not created")),
            };
        let binding = GraphicsBinding {
            instance,
            physical_device,
            device,
            queue_family_index,
            queue_index,
        };
        self.binding = Some(binding);
        Ok(binding)
    }

    pub fn graphics_binding(&self) -> Option<&GraphicsBinding> {
        self.binding.as_ref()
    }

    pub fn physical_device(&self) -> Option<&PhysicalDeviceInfo> {
        self.physical_device.as_ref()
    }

    /// Destroy the device, then the instance, and clear the binding.
    pub fn teardown<R: XrRuntime + ?Sized>(&mut self, runtime: &mut R) {
        self.binding = None;
        if let Some((device, _)) = self.device.take() {
            runtime.destroy_gpu_device(device);
        }
        self.physical_device = None;
        if let Some(instance) = self.gpu_instance.take() {
            runtime.destroy_gpu_instance(instance);
        }
        self.requirements = None;
    }
}
