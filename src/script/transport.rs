//! Connection to the backing store.
//!
//! The dispatcher only needs two primitives: run a cached script by hash
//! and load a script body into the cache.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisWrite, ToRedisArgs, Value};
use tracing::debug;

use crate::error::TransportError;
use crate::wire::{Arg, Reply};

/// Script-cache execution against the backing store.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs the script cached under `hash`. Must report
    /// [`TransportError::NoScript`] when the hash is not cached.
    async fn eval_sha(&self, hash: &str, args: &[Arg]) -> Result<Reply, TransportError>;

    /// Loads a script body and returns the hash it is cached under.
    async fn script_load(&self, body: &str) -> Result<String, TransportError>;
}

impl ToRedisArgs for Arg {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        match self {
            Arg::Int(n) => n.write_redis_args(out),
            Arg::Str(s) => s.write_redis_args(out),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => Reply::Nil,
            Value::Int(n) => Reply::Int(n),
            Value::Data(bytes) => Reply::Bytes(bytes),
            Value::Bulk(items) => Reply::Array(items.into_iter().map(Reply::from).collect()),
            Value::Status(s) => Reply::Status(s),
            Value::Okay => Reply::Okay,
        }
    }
}

/// Redis transport over a [`ConnectionManager`].
///
/// The manager multiplexes requests over one connection and reconnects
/// on failure, so clones can be used from concurrent tasks.
#[derive(Clone)]
pub struct RedisTransport {
    redis: ConnectionManager,
}

impl RedisTransport {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connection` if the URL is invalid or the
    /// connection cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Wraps an existing connection manager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn eval_sha(&self, hash: &str, args: &[Arg]) -> Result<Reply, TransportError> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(hash);
        for arg in args {
            cmd.arg(arg);
        }

        let value = cmd.query_async::<_, Value>(&mut conn).await?;
        Ok(Reply::from(value))
    }

    async fn script_load(&self, body: &str) -> Result<String, TransportError> {
        let mut conn = self.redis.clone();

        let hash: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(body)
            .query_async(&mut conn)
            .await?;

        debug!(hash = %hash, bytes = body.len(), "Loaded script body");
        Ok(hash)
    }
}
