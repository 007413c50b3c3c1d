//! OneMount Audit - Structured logging and audit trail
//!
//! Provides:
//! - Structured event logging via [`AuditLogger`]
//! - Reason codes ([`ReasonCode`]) for categorizing failures and conflicts
//! - Queryable audit history (backed by `IStateRepository`)
//! - Integration with `onemount explain`

pub mod logger;
pub mod reason;

pub use logger::AuditLogger;
pub use reason::ReasonCode;
