//! Session-bound swapchains.

use crate::error::{RtResultExt, XrError, XrResult};
use crate::runtime::{SessionHandle, SwapchainHandle, XrRuntime};
use crate::system::first_supported;
use crate::types::{SwapchainCreateDesc, SwapchainUsage};

/// Pick the first runtime-advertised format the renderer accepts.
pub fn choose_swapchain_format(advertised: &[i64], acceptable: &[i64]) -> Option<i64> {
    first_supported(advertised, acceptable)
}

impl SwapchainCreateDesc {
    /// Single-face, single-layer, single-mip swapchain.
    pub fn new(usage: SwapchainUsage, format: i64, sample_count: u32, width: u32, height: u32) -> Self {
        Self {
            usage,
            format,
            sample_count,
            width,
            height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        }
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Swapchain {
    handle: SwapchainHandle,
    format: i64,
    sample_count: u32,
    width: u32,
    height: u32,
    images: Vec<u64>,
}

impl Swapchain {
    pub fn handle(&self) -> SwapchainHandle {
        self.handle
    }

    pub fn format(&self) -> i64 {
        self.format
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Native backing images (`VkImage` values for the Vulkan backend).
    pub fn images(&self) -> &[u64] {
        &self.images
    }
}

/// Swapchains registered to the current session.
#[derive(Debug, Default)]
pub struct SwapchainRegistry {
    live: Vec<Swapchain>,
}

impl SwapchainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Swapchain> {
        self.live.iter()
    }

    pub fn get(&self, handle: SwapchainHandle) -> Option<&Swapchain> {
        self.live.iter().find(|sc| sc.handle == handle)
    }

    fn require(&self, handle: SwapchainHandle) -> XrResult<()> {
        if self.get(handle).is_some() {
            Ok(())
        } else {
            Err(XrError::invalid_state(format!(
                "swapchain {} is not registered",
                handle.into_raw()
            )))
        }
    }

    pub fn create<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        session: SessionHandle,
        desc: &SwapchainCreateDesc,
    ) -> XrResult<&Swapchain> {
        let handle = runtime
            .create_swapchain(session, desc)
            .op("xrCreateSwapchain")?;
        let images = match runtime
            .enumerate_swapchain_images(handle)
            .op("xrEnumerateSwapchainImages")
        {
            Ok(images) => images,
            Err(err) => {
                runtime.destroy_swapchain(handle);
                return Err(err);
            }
        };
        tracing::debug!(
            format = desc.format,
            width = desc.width,
            height = desc.height,
            samples = desc.sample_count,
            images = images.len(),
            "swapchain created"
        );
        let index = self.live.len();
        self.live.push(Swapchain {
            handle,
            format: desc.format,
            sample_count: desc.sample_count,
            width: desc.width,
            height: desc.height,
            images,
        });
        Ok(&self.live[index])
    }

    pub fn destroy<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        handle: SwapchainHandle,
    ) -> XrResult<()> {
        let index = self
            .live
            .iter()
            .position(|sc| sc.handle == handle)
            .ok_or_else(|| {
                XrError::invalid_state(format!("swapchain {} is not registered", handle.into_raw()))
            })?;
        self.live.remove(index);
        runtime.destroy_swapchain(handle);
        Ok(())
    }

    pub fn acquire<R: XrRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        handle: SwapchainHandle,
    ) -> XrResult<u32> {
        self.require(handle)?;
        runtime
            .acquire_swapchain_image(handle)
            .op("xrAcquireSwapchainImage")
    }

    pub fn wait<R: XrRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        handle: SwapchainHandle,
        timeout_ns: i64,
    ) -> XrResult<()> {
        self.require(handle)?;
        runtime
            .wait_swapchain_image(handle, timeout_ns)
            .op("xrWaitSwapchainImage")
    }

    pub fn release<R: XrRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        handle: SwapchainHandle,
    ) -> XrResult<()> {
        self.require(handle)?;
        runtime
            .release_swapchain_image(handle)
            .op("xrReleaseSwapchainImage")
    }

    /// Destroy every swapchain still registered, newest first.
    pub fn sweep<R: XrRuntime + ?Sized>(&mut self, runtime: &mut R) {
        if !self.live.is_empty() {
            tracing::debug!(count = self.live.len(), "destroying swapchains left by collaborators");
        }
        while let Some(sc) = self.live.pop() {
            runtime.destroy_swapchain(sc.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRGB: i64 = 43;
    const UNORM: i64 = 37;
    const FLOAT16: i64 = 97;

    #[test]
    fn test_choose_format_runtime_order() {
        assert_eq!(choose_swapchain_format(&[UNORM, SRGB], &[SRGB, UNORM]), Some(UNORM));
        assert_eq!(choose_swapchain_format(&[FLOAT16, SRGB], &[SRGB]), Some(SRGB));
        assert_eq!(choose_swapchain_format(&[FLOAT16], &[SRGB, UNORM]), None);
    }

    #[test]
    fn test_desc_defaults_single_layer() {
        let desc = SwapchainCreateDesc::new(SwapchainUsage::COLOR_ATTACHMENT, SRGB, 1, 1440, 1600);
        assert_eq!(desc.face_count, 1);
        assert_eq!(desc.array_size, 1);
        assert_eq!(desc.mip_count, 1);
        assert_eq!(desc.with_array_size(2).array_size, 2);
    }
}
