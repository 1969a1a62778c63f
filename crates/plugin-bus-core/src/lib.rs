//! # Plugin Bus Core
//!
//! Foundational types shared by every other crate in the plugin bus: the
//! four bus record kinds and their filter algebra, the request/response
//! envelope that the dual transport carries, and the error taxonomy bus
//! clients and the plugin context raise.
//!
//! This crate has no knowledge of transports, queues, or the host process —
//! it only defines the shapes that flow through them.

pub mod envelope;
pub mod error;
pub mod record;

pub use envelope::{RequestEnvelope, RequestKind, ResponseEnvelope, ResponseOutcome};
pub use error::{BusError, BusResult};
pub use record::{
    BusFilter, BusList, BusOp, BusRecord, EventList, EventRecord, GetPlan, LifecycleList,
    LifecycleRecord, MemoryList, MemoryRecord, MessageList, MessageRecord,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::envelope::{RequestEnvelope, RequestKind, ResponseEnvelope, ResponseOutcome};
    pub use crate::error::{BusError, BusResult};
    pub use crate::record::*;
}
