//! qless-client: a client for qless job queues stored in Redis.
//!
//! All queue operations run inside a Lua script library on the Redis
//! server. This crate dispatches typed operations to that library by
//! script hash, reloading it when the server has forgotten it, and
//! presents jobs and recurring jobs as local entities whose methods drive
//! their server-side lifecycle.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod script;
pub mod wire;

pub use client::{Client, ClientBuilder, Event, EventKind, Events, Lookup, PutOptions, Queue, RecurOptions};
pub use config::{ClientConfig, ConfigError};
pub use error::{QlessError, Result, TransportError};
pub use job::{Job, JobState, RecurringJob};
