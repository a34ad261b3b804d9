//! OpenXR + Vulkan backend for `halo-xr`.
//!
//! [`OpenXrRuntime`] loads the system OpenXR and Vulkan loaders and implements
//! [`halo_xr::XrRuntime`] on top of the `openxr` and `ash` crates.

mod convert;
mod debug;
mod error;
mod runtime;
mod vulkan;

pub use error::BackendError;
pub use runtime::OpenXrRuntime;
