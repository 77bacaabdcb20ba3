//! Job and recurring-job entities.
//!
//! Instances are projections of records held by the script runtime. Each
//! one carries a back-reference to the [`Client`](crate::client::Client)
//! that produced it; the reference is never serialized and is reattached
//! whenever a record is decoded from a reply.

pub mod jid;
pub mod model;
pub mod recurring;

pub use jid::{JidGenerator, SequentialJidGenerator, UuidJidGenerator};
pub use model::{Failure, HistoryEntry, Job, JobState, DEFAULT_RETRIES};
pub use recurring::RecurringJob;
