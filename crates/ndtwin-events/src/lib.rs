//! Synchronous topic-keyed event bus for flow and link lifecycle
//! notifications: `FlowAdded`, `LinkFailureDetected`, `IdleFlowPurged`,
//! `LinkRecoveryDetected`, `SwitchEntered`, `SwitchExited`.

pub mod bus;
pub mod events;

pub use bus::{EventBus, Handler};
pub use events::{
    FlowAddedPayload, IdleFlowPurgedPayload, LinkFailurePayload, LinkRecoveryPayload, NdtEvent,
    SwitchTransitionPayload,
};
