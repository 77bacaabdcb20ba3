//! Script dispatch over the backing store.
//!
//! All queue operations funnel through one server-side script library,
//! invoked by content hash:
//!
//! ```text
//!   Client ──▶ ScriptDispatcher ──▶ Transport ──▶ EVALSHA <hash> 0 <opcode> <now> ...
//!                    │                   │
//!                    │   NOSCRIPT        │
//!                    ◀───────────────────┘
//!                    │
//!                    └──▶ SCRIPT LOAD <body> ──▶ retry once
//! ```

pub mod dispatcher;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use dispatcher::{ScriptDispatcher, ScriptSource};
pub use transport::{RedisTransport, Transport};
