//! System, view configuration and blend mode selection.

use crate::error::{runtime_failure, RtResultExt, XrError, XrResult};
use crate::runtime::{InstanceHandle, SystemId, XrRuntime};
use crate::types::{EnvironmentBlendMode, FormFactor, ViewConfigurationKind, ViewDescriptor};

/// The first runtime-advertised candidate that the caller also accepts.
///
/// Runtime order wins over preference order; preference only filters.
pub fn first_supported<T: PartialEq + Copy>(advertised: &[T], acceptable: &[T]) -> Option<T> {
    advertised
        .iter()
        .copied()
        .find(|candidate| acceptable.contains(candidate))
}

/// A resolved view configuration. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewConfiguration {
    kind: ViewConfigurationKind,
    views: Vec<ViewDescriptor>,
}

impl ViewConfiguration {
    pub fn kind(&self) -> ViewConfigurationKind {
        self.kind
    }

    pub fn views(&self) -> &[ViewDescriptor] {
        &self.views
    }
}

/// Everything resolved once per instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSystem {
    pub id: SystemId,
    pub form_factor: FormFactor,
    pub view_configuration: ViewConfiguration,
    pub blend_mode: EnvironmentBlendMode,
}

pub fn resolve_system<R: XrRuntime + ?Sized>(
    runtime: &mut R,
    instance: InstanceHandle,
    form_factor: FormFactor,
) -> XrResult<SystemId> {
    runtime.system(instance, form_factor).map_err(|code| {
        let err = runtime_failure("xrGetSystem", code);
        XrError::SystemNotFound(format!("{form_factor:?}: {err}"))
    })
}

pub fn resolve_view_configuration<R: XrRuntime + ?Sized>(
    runtime: &R,
    instance: InstanceHandle,
    system: SystemId,
    preference: &[ViewConfigurationKind],
) -> XrResult<ViewConfiguration> {
    let advertised = runtime
        .enumerate_view_configurations(instance, system)
        .op("xrEnumerateViewConfigurations")?;
    let kind = first_supported(&advertised, preference).ok_or_else(|| {
        XrError::unsupported(format!(
            "no acceptable view configuration: runtime offers {advertised:?}, accepted {preference:?}"
        ))
    })?;

    let views = runtime
        .enumerate_view_configuration_views(instance, system, kind)
        .op("xrEnumerateViewConfigurationViews")?;
    if views.is_empty() {
        return Err(XrError::unsupported(format!(
            "view configuration {kind:?} reports no views"
        )));
    }

    tracing::info!(?kind, views = views.len(), "view configuration resolved");
    Ok(ViewConfiguration { kind, views })
}

pub fn resolve_blend_mode<R: XrRuntime + ?Sized>(
    runtime: &R,
    instance: InstanceHandle,
    system: SystemId,
    kind: ViewConfigurationKind,
    preference: &[EnvironmentBlendMode],
) -> XrResult<EnvironmentBlendMode> {
    let advertised = runtime
        .enumerate_environment_blend_modes(instance, system, kind)
        .op("xrEnumerateEnvironmentBlendModes")?;
    let mode = first_supported(&advertised, preference).ok_or_else(|| {
        XrError::unsupported(format!(
            "no acceptable blend mode: runtime offers {advertised:?}, accepted {preference:?}"
        ))
    })?;
    tracing::info!(?mode, "environment blend mode resolved");
    Ok(mode)
}

/// Resolve system, view configuration and blend mode in one pass.
pub fn resolve<R: XrRuntime + ?Sized>(
    runtime: &mut R,
    instance: InstanceHandle,
    form_factor: FormFactor,
    view_preference: &[ViewConfigurationKind],
    blend_preference: &[EnvironmentBlendMode],
) -> XrResult<ResolvedSystem> {
    let id = resolve_system(runtime, instance, form_factor)?;
    let view_configuration = resolve_view_configuration(runtime, instance, id, view_preference)?;
    let blend_mode = resolve_blend_mode(
        runtime,
        instance,
        id,
        view_configuration.kind(),
        blend_preference,
    )?;
    Ok(ResolvedSystem {
        id,
        form_factor,
        view_configuration,
        blend_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ViewConfigurationKind::*;

    #[test]
    fn test_first_supported_uses_runtime_order() {
        assert_eq!(
            first_supported(&[PrimaryMono, PrimaryStereo], &[PrimaryStereo, PrimaryMono]),
            Some(PrimaryMono)
        );
    }

    #[test]
    fn test_first_supported_falls_back_to_mono() {
        assert_eq!(
            first_supported(&[PrimaryMono], &[PrimaryStereo, PrimaryMono]),
            Some(PrimaryMono)
        );
    }

    #[test]
    fn test_first_supported_empty_intersection() {
        assert_eq!(first_supported(&[PrimaryStereoWithFoveatedInset], &[PrimaryStereo]), None);
        assert_eq!(
            first_supported::<EnvironmentBlendMode>(&[], &[EnvironmentBlendMode::Opaque]),
            None
        );
    }

    #[test]
    fn test_blend_mode_preference_filter() {
        use EnvironmentBlendMode::*;
        assert_eq!(
            first_supported(&[AlphaBlend, Additive, Opaque], &[Opaque, Additive]),
            Some(Additive)
        );
    }
}
