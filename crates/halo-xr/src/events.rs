use crate::runtime::SessionHandle;
use crate::session::SessionState;
use crate::types::{ReferenceSpaceKind, Time};

/// An event drained from the runtime's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
        time: Time,
    },
    /// The runtime is going away; the instance must be destroyed.
    InstanceLossPending { loss_time: Time },
    EventsLost { count: u32 },
    InteractionProfileChanged { session: SessionHandle },
    ReferenceSpaceChangePending {
        session: SessionHandle,
        kind: ReferenceSpaceKind,
        change_time: Time,
    },
    /// An event type this crate does not model.
    Unknown { raw_type: i32 },
}
