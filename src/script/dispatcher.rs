//! Script cache dispatcher.
//!
//! Maps a script identifier to the hash the runtime has cached it under and
//! invokes it. When the runtime reports the hash as unknown (first use after
//! a flush, a failover to a fresh replica, ...), the body is loaded again and
//! the invocation is retried exactly once. A second miss is surfaced as
//! [`QlessError::ScriptUnavailable`].
//!
//! # Concurrency
//!
//! Each cache entry carries a generation number. Reloads are serialized by
//! a mutex; a caller that waited on the mutex and finds a newer generation
//! than the one it failed with reuses that hash instead of loading again.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::transport::Transport;
use crate::config::ConfigError;
use crate::error::{QlessError, Result, TransportError};
use crate::wire::{Clock, Invocation, Reply};

/// A named script body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    name: String,
    body: String,
}

impl ScriptSource {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    /// Reads a script body from disk.
    pub async fn from_file(
        name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> std::result::Result<Self, ConfigError> {
        let body = tokio::fs::read_to_string(path.as_ref()).await?;
        if body.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(format!(
                "script file '{}' is empty",
                path.as_ref().display()
            )));
        }
        Ok(Self::new(name, body))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

#[derive(Debug, Clone)]
struct CachedHash {
    hash: String,
    generation: u64,
}

/// Dispatches invocations to cached scripts.
pub struct ScriptDispatcher {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    scripts: HashMap<String, ScriptSource>,
    cache: RwLock<HashMap<String, CachedHash>>,
    reload_lock: Mutex<()>,
}

impl ScriptDispatcher {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            scripts: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
            reload_lock: Mutex::new(()),
        }
    }

    /// Registers a script. Replaces any script with the same name.
    pub fn register(&mut self, script: ScriptSource) {
        self.scripts.insert(script.name.clone(), script);
    }

    /// Registers a script, builder style.
    pub fn with_script(mut self, script: ScriptSource) -> Self {
        self.register(script);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Loads every registered script that is not cached yet.
    pub async fn preload(&self) -> Result<()> {
        for script in self.scripts.values() {
            if self.cached(&script.name).await.is_none() {
                self.reload(script, 0).await?;
            }
        }
        Ok(())
    }

    /// Invokes `invocation` through the script registered as `script_name`.
    pub async fn invoke(&self, script_name: &str, invocation: &Invocation) -> Result<Reply> {
        let script = self
            .scripts
            .get(script_name)
            .ok_or_else(|| QlessError::UnknownScript(script_name.to_string()))?;
        let op = invocation.opcode().as_str();
        let args = invocation.encode(self.clock.now());

        let cached = match self.cached(script_name).await {
            Some(cached) => cached,
            None => self.reload(script, 0).await?,
        };

        debug!(script = script_name, op, "Invoking script");
        match self.transport.eval_sha(&cached.hash, &args).await {
            Err(TransportError::NoScript(_)) => {
                warn!(
                    script = script_name,
                    op,
                    hash = %cached.hash,
                    "Script hash unknown to runtime, reloading"
                );
                let fresh = self.reload(script, cached.generation).await?;
                match self.transport.eval_sha(&fresh.hash, &args).await {
                    Err(TransportError::NoScript(_)) => {
                        Err(QlessError::ScriptUnavailable(script_name.to_string()))
                    }
                    other => other.map_err(|e| QlessError::from_transport(op, e)),
                }
            }
            other => other.map_err(|e| QlessError::from_transport(op, e)),
        }
    }

    async fn cached(&self, script_name: &str) -> Option<CachedHash> {
        self.cache.read().await.get(script_name).cloned()
    }

    /// Loads `script` unless another caller already replaced the entry
    /// observed at `seen_generation`.
    async fn reload(&self, script: &ScriptSource, seen_generation: u64) -> Result<CachedHash> {
        let _guard = self.reload_lock.lock().await;

        let current = self.cached(&script.name).await;
        if let Some(ref entry) = current {
            if entry.generation > seen_generation {
                debug!(script = %script.name, "Script already reloaded by another caller");
                return Ok(entry.clone());
            }
        }

        let hash = self
            .transport
            .script_load(&script.body)
            .await
            .map_err(|e| QlessError::from_transport("script.load", e))?;

        let entry = CachedHash {
            hash,
            generation: current.map_or(0, |c| c.generation) + 1,
        };
        info!(
            script = %script.name,
            hash = %entry.hash,
            generation = entry.generation,
            "Script loaded"
        );
        self.cache
            .write()
            .await
            .insert(script.name.clone(), entry.clone());
        Ok(entry)
    }
}
