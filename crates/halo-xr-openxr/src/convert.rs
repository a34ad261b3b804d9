//! Conversions between halo-xr's runtime-neutral types and the `openxr` crate.

use std::ffi::c_char;

use halo_xr::{
    ActionStateValue, ApiVersion, EnvironmentBlendMode, Fov, FormFactor, Pose,
    ReferenceSpaceKind, ResultCode, SessionState, SpaceLocation, SwapchainUsage, Time,
    ViewConfigurationKind, ViewDescriptor,
};
use openxr as xr;

// Core values promoted in OpenXR 1.1; raw so older headers still build.
const PRIMARY_STEREO_WITH_FOVEATED_INSET: i32 = 1_000_037_000;
const LOCAL_FLOOR: i32 = 1_000_426_000;

pub fn xr_code(result: xr::sys::Result) -> ResultCode {
    ResultCode::new(result.into_raw(), format!("XR_{result:?}"))
}

pub fn vk_code(raw: i32) -> ResultCode {
    ResultCode::new(raw, format!("VK_{:?}", ash::vk::Result::from_raw(raw)))
}

pub fn time_to_xr(time: Time) -> xr::Time {
    xr::Time::from_nanos(time.as_nanos())
}

pub fn time_from_xr(time: xr::Time) -> Time {
    Time::from_nanos(time.as_nanos())
}

pub fn form_factor(form_factor: FormFactor) -> xr::FormFactor {
    match form_factor {
        FormFactor::HeadMountedDisplay => xr::FormFactor::HEAD_MOUNTED_DISPLAY,
        FormFactor::HandheldDisplay => xr::FormFactor::HANDHELD_DISPLAY,
    }
}

pub fn view_configuration_to_xr(kind: ViewConfigurationKind) -> xr::ViewConfigurationType {
    match kind {
        ViewConfigurationKind::PrimaryMono => xr::ViewConfigurationType::PRIMARY_MONO,
        ViewConfigurationKind::PrimaryStereo => xr::ViewConfigurationType::PRIMARY_STEREO,
        ViewConfigurationKind::PrimaryStereoWithFoveatedInset => {
            xr::ViewConfigurationType::from_raw(PRIMARY_STEREO_WITH_FOVEATED_INSET)
        }
    }
}

/// `None` for view configurations this crate has no use for (e.g. vendor ones).
pub fn view_configuration_from_xr(ty: xr::ViewConfigurationType) -> Option<ViewConfigurationKind> {
    match ty {
        xr::ViewConfigurationType::PRIMARY_MONO => Some(ViewConfigurationKind::PrimaryMono),
        xr::ViewConfigurationType::PRIMARY_STEREO => Some(ViewConfigurationKind::PrimaryStereo),
        other if other.into_raw() == PRIMARY_STEREO_WITH_FOVEATED_INSET => {
            Some(ViewConfigurationKind::PrimaryStereoWithFoveatedInset)
        }
        _ => None,
    }
}

pub fn view_descriptor(view: &xr::ViewConfigurationView) -> ViewDescriptor {
    ViewDescriptor {
        recommended_width: view.recommended_image_rect_width,
        max_width: view.max_image_rect_width,
        recommended_height: view.recommended_image_rect_height,
        max_height: view.max_image_rect_height,
        recommended_sample_count: view.recommended_swapchain_sample_count,
        max_sample_count: view.max_swapchain_sample_count,
    }
}

pub fn blend_mode_to_xr(mode: EnvironmentBlendMode) -> xr::EnvironmentBlendMode {
    match mode {
        EnvironmentBlendMode::Opaque => xr::EnvironmentBlendMode::OPAQUE,
        EnvironmentBlendMode::Additive => xr::EnvironmentBlendMode::ADDITIVE,
        EnvironmentBlendMode::AlphaBlend => xr::EnvironmentBlendMode::ALPHA_BLEND,
    }
}

pub fn blend_mode_from_xr(mode: xr::EnvironmentBlendMode) -> Option<EnvironmentBlendMode> {
    match mode {
        xr::EnvironmentBlendMode::OPAQUE => Some(EnvironmentBlendMode::Opaque),
        xr::EnvironmentBlendMode::ADDITIVE => Some(EnvironmentBlendMode::Additive),
        xr::EnvironmentBlendMode::ALPHA_BLEND => Some(EnvironmentBlendMode::AlphaBlend),
        _ => None,
    }
}

pub fn reference_space_to_xr(kind: ReferenceSpaceKind) -> xr::ReferenceSpaceType {
    match kind {
        ReferenceSpaceKind::View => xr::ReferenceSpaceType::VIEW,
        ReferenceSpaceKind::Local => xr::ReferenceSpaceType::LOCAL,
        ReferenceSpaceKind::Stage => xr::ReferenceSpaceType::STAGE,
        ReferenceSpaceKind::LocalFloor => xr::ReferenceSpaceType::from_raw(LOCAL_FLOOR),
    }
}

pub fn reference_space_from_xr(ty: xr::ReferenceSpaceType) -> ReferenceSpaceKind {
    match ty {
        xr::ReferenceSpaceType::VIEW => ReferenceSpaceKind::View,
        xr::ReferenceSpaceType::STAGE => ReferenceSpaceKind::Stage,
        other if other.into_raw() == LOCAL_FLOOR => ReferenceSpaceKind::LocalFloor,
        _ => ReferenceSpaceKind::Local,
    }
}

pub fn session_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

pub fn swapchain_usage(usage: SwapchainUsage) -> xr::SwapchainUsageFlags {
    // Bit positions are shared with XrSwapchainUsageFlags.
    xr::SwapchainUsageFlags::from_raw(u64::from(usage.bits()))
}

pub fn pose_from_xr(pose: xr::Posef) -> Pose {
    Pose {
        position: [pose.position.x, pose.position.y, pose.position.z],
        orientation: [
            pose.orientation.x,
            pose.orientation.y,
            pose.orientation.z,
            pose.orientation.w,
        ],
    }
}

pub fn pose_to_xr(pose: Pose) -> xr::Posef {
    let [x, y, z] = pose.position;
    let [qx, qy, qz, qw] = pose.orientation;
    xr::Posef {
        orientation: xr::Quaternionf {
            x: qx,
            y: qy,
            z: qz,
            w: qw,
        },
        position: xr::Vector3f { x, y, z },
    }
}

pub fn fov_from_xr(fov: xr::Fovf) -> Fov {
    Fov {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

pub fn fov_to_xr(fov: Fov) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

pub fn space_location(location: &xr::SpaceLocation) -> SpaceLocation {
    let flags = location.location_flags;
    SpaceLocation {
        pose: pose_from_xr(location.pose),
        position_valid: flags.contains(xr::SpaceLocationFlags::POSITION_VALID),
        orientation_valid: flags.contains(xr::SpaceLocationFlags::ORIENTATION_VALID),
        position_tracked: flags.contains(xr::SpaceLocationFlags::POSITION_TRACKED),
        orientation_tracked: flags.contains(xr::SpaceLocationFlags::ORIENTATION_TRACKED),
    }
}

pub fn api_version_from_xr(version: xr::Version) -> ApiVersion {
    ApiVersion::new(version.major(), version.minor(), version.patch())
}

pub fn vk_api_version(version: ApiVersion) -> u32 {
    ash::vk::make_api_version(
        0,
        u32::from(version.major),
        u32::from(version.minor),
        version.patch,
    )
}

pub fn rect_to_xr(rect: halo_xr::Rect2D) -> xr::Rect2Di {
    xr::Rect2Di {
        offset: xr::Offset2Di {
            x: rect.x,
            y: rect.y,
        },
        extent: xr::Extent2Di {
            width: rect.width,
            height: rect.height,
        },
    }
}

pub fn bool_state(state: xr::ActionState<bool>) -> ActionStateValue {
    ActionStateValue::Boolean {
        current: state.current_state,
        changed: state.changed_since_last_sync,
    }
}

pub fn float_state(state: xr::ActionState<f32>) -> ActionStateValue {
    ActionStateValue::Float {
        current: state.current_state,
        changed: state.changed_since_last_sync,
    }
}

pub fn vector2_state(state: xr::ActionState<xr::Vector2f>) -> ActionStateValue {
    ActionStateValue::Vector2 {
        current: [state.current_state.x, state.current_state.y],
        changed: state.changed_since_last_sync,
    }
}

/// Copy `src` into a fixed-size, NUL-terminated C string field, truncating if needed.
pub fn place_cstr(out: &mut [c_char], src: &str) {
    let Some(max) = out.len().checked_sub(1) else {
        return;
    };
    let bytes = src.as_bytes();
    let len = bytes.len().min(max);
    for (dst, byte) in out.iter_mut().zip(&bytes[..len]) {
        *dst = *byte as c_char;
    }
    out[len] = 0;
}

macro_rules! known_extensions {
    ($($(#[$cfg:meta])* $name:literal => $field:ident,)*) => {
        /// Names of every extension set in `set`, known ones first.
        pub fn extension_names(set: &xr::ExtensionSet) -> Vec<String> {
            let mut names = Vec::new();
            $(
                $(#[$cfg])*
                if set.$field {
                    names.push($name.to_string());
                }
            )*
            names.extend(
                set.other
                    .iter()
                    .map(|name| String::from_utf8_lossy(name).into_owned()),
            );
            names
        }

        pub fn extension_set<'a>(names: impl IntoIterator<Item = &'a str>) -> xr::ExtensionSet {
            let mut set = xr::ExtensionSet::default();
            for name in names {
                match name {
                    $(
                        $(#[$cfg])*
                        $name => set.$field = true,
                    )*
                    other => set.other.push(other.as_bytes().to_vec()),
                }
            }
            set
        }
    };
}

known_extensions! {
    "XR_KHR_vulkan_enable2" => khr_vulkan_enable2,
    "XR_KHR_vulkan_enable" => khr_vulkan_enable,
    "XR_KHR_composition_layer_depth" => khr_composition_layer_depth,
    "XR_KHR_visibility_mask" => khr_visibility_mask,
    #[cfg(target_os = "android")]
    "XR_KHR_android_create_instance" => khr_android_create_instance,
    "XR_EXT_debug_utils" => ext_debug_utils,
    "XR_EXT_hand_tracking" => ext_hand_tracking,
    "XR_EXT_eye_gaze_interaction" => ext_eye_gaze_interaction,
    "XR_EXT_hp_mixed_reality_controller" => ext_hp_mixed_reality_controller,
    "XR_FB_display_refresh_rate" => fb_display_refresh_rate,
    "XR_MSFT_hand_interaction" => msft_hand_interaction,
}
