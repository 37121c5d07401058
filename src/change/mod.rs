//! Change records, payloads, and the deterministic evaluator.

mod evaluator;
mod payload;
mod record;

pub use evaluator::{evaluate, RejectReason, Verdict};
pub use payload::{ChangePayload, SettingTarget};
pub use record::{ChangeAudit, ChangeRecord, ChangeState, ChangeUuid, Version};
