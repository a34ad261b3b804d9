use thiserror::Error;

/// Failures loading the native loaders, before any runtime call is made.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to load the OpenXR loader: {0}")]
    OpenXrLoad(String),

    #[error("failed to load the Vulkan loader: {0}")]
    VulkanLoad(String),
}
