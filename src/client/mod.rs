//! Client facade, queue handles and event subscriptions.

pub mod events;
pub mod facade;
pub mod queue;

pub use events::{Event, EventKind, Events};
pub use facade::{Client, ClientBuilder, Lookup, TaggedReply, TrackedReply};
pub use queue::{PutOptions, Queue, RecurOptions};
