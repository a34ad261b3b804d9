//! Per-frame wait/begin/end protocol.

use crate::error::{RtResultExt, XrError, XrResult};
use crate::runtime::{SessionHandle, SpaceHandle, SwapchainHandle, XrRuntime};
use crate::session::SessionState;
use crate::types::{EnvironmentBlendMode, Fov, Pose, Rect2D, Time};

/// One view of a projection layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    pub swapchain: SwapchainHandle,
    pub image_rect: Rect2D,
    pub image_array_index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionLayer {
    pub space: SpaceHandle,
    pub views: Vec<ProjectionView>,
}

/// What is handed to the runtime at end of frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSubmission {
    pub display_time: Time,
    pub blend_mode: EnvironmentBlendMode,
    pub layers: Vec<ProjectionLayer>,
}

/// Result of [`FrameScheduler::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameBegin {
    pub predicted_display_time: Time,
    pub predicted_display_period: i64,
    /// When false the frame has already been ended; the caller must not call `end_frame`.
    pub should_render: bool,
}

/// Enforces strict begin/end alternation.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    in_frame: bool,
    last_display_time: Option<Time>,
    frames_begun: u64,
    frames_ended: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    pub fn frames_begun(&self) -> u64 {
        self.frames_begun
    }

    pub fn frames_ended(&self) -> u64 {
        self.frames_ended
    }

    /// Wait for the next frame slot and begin it.
    ///
    /// Blocks in the runtime's wait call. If the session is not in an active
    /// state or the runtime reports nothing to render, the frame is ended with
    /// no layers before returning `should_render == false`.
    pub fn begin_frame<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        session: SessionHandle,
        state: SessionState,
        blend_mode: EnvironmentBlendMode,
    ) -> XrResult<FrameBegin> {
        if self.in_frame {
            tracing::error!("begin_frame called while a frame is still open");
            return Err(XrError::frame_protocol(
                "begin_frame called twice without end_frame",
            ));
        }

        let timing = runtime.wait_frame(session).op("xrWaitFrame")?;
        runtime.begin_frame(session).op("xrBeginFrame")?;
        self.in_frame = true;
        self.frames_begun += 1;

        if let Some(last) = self.last_display_time {
            if timing.predicted_display_time <= last {
                tracing::warn!(
                    last = last.as_nanos(),
                    predicted = timing.predicted_display_time.as_nanos(),
                    "predicted display time did not advance"
                );
            }
        }
        self.last_display_time = Some(timing.predicted_display_time);

        let should_render = timing.should_render && state.is_active();
        if !should_render {
            tracing::trace!(?state, runtime_should_render = timing.should_render, "skipping render");
            self.end_frame(
                runtime,
                session,
                timing.predicted_display_time,
                blend_mode,
                None,
            )?;
        }

        Ok(FrameBegin {
            predicted_display_time: timing.predicted_display_time,
            predicted_display_period: timing.predicted_display_period,
            should_render,
        })
    }

    /// End the open frame. `layer == None` or an empty view list submits no layers.
    pub fn end_frame<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        session: SessionHandle,
        display_time: Time,
        blend_mode: EnvironmentBlendMode,
        layer: Option<ProjectionLayer>,
    ) -> XrResult<()> {
        if !self.in_frame {
            tracing::error!("end_frame called without a matching begin_frame");
            return Err(XrError::frame_protocol(
                "end_frame called without begin_frame",
            ));
        }
        self.in_frame = false;
        self.frames_ended += 1;

        let layers = match layer {
            Some(layer) if !layer.views.is_empty() => vec![layer],
            _ => Vec::new(),
        };
        let submission = FrameSubmission {
            display_time,
            blend_mode,
            layers,
        };
        runtime.end_frame(session, &submission).op("xrEndFrame")
    }

    /// Forget the open frame after the session is gone.
    pub fn reset(&mut self) {
        if self.in_frame {
            tracing::warn!("session torn down with a frame still open");
        }
        self.in_frame = false;
        self.last_display_time = None;
    }
}
