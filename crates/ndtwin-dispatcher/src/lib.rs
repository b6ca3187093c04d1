//! Flow-rule dispatcher: serialises install/modify/delete mutations to
//! each datapath in FIFO order through a per-dpid worker, so concurrent
//! callers never race their rule changes on the same switch.

pub mod dispatch;
pub mod job;

pub use dispatch::{Dispatcher, DispatcherConfig, RuleSender};
pub use job::{parse_batch, FlowJob, FlowOp};
