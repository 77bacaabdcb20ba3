//! Queue handles.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::facade::Client;
use crate::error::{QlessError, Result};
use crate::job::{Job, JobState};
use crate::wire::{decode_string, decode_string_list, encode_payload, Invocation, Opcode};

/// Options for [`Queue::put`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Use this jid instead of generating one.
    pub jid: Option<String>,
    /// Seconds before the job becomes eligible.
    pub delay: i64,
    pub priority: Option<i64>,
    pub tags: Vec<String>,
    pub retries: Option<i64>,
    /// Jids that must complete first.
    pub depends: Vec<String>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jid(mut self, jid: impl Into<String>) -> Self {
        self.jid = Some(jid.into());
        self
    }

    pub fn with_delay(mut self, delay: i64) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retries(mut self, retries: i64) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_depends<I, S>(mut self, jids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = jids.into_iter().map(Into::into).collect();
        self
    }
}

/// Options for [`Queue::recur`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurOptions {
    pub jid: Option<String>,
    /// Seconds before the first spawn.
    pub offset: i64,
    pub priority: Option<i64>,
    pub tags: Vec<String>,
    pub retries: Option<i64>,
}

impl RecurOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jid(mut self, jid: impl Into<String>) -> Self {
        self.jid = Some(jid.into());
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retries(mut self, retries: i64) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// A named queue and, when fetched through [`Client::queues`], its job
/// counts at the time of the call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub waiting: i64,
    #[serde(default)]
    pub running: i64,
    #[serde(default)]
    pub scheduled: i64,
    #[serde(default)]
    pub stalled: i64,
    #[serde(default)]
    pub depends: i64,
    #[serde(default)]
    pub recurring: i64,

    #[serde(skip)]
    client: Option<Client>,
}

impl Queue {
    pub(crate) fn new(client: Client, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: Some(client),
            ..Default::default()
        }
    }

    pub(crate) fn attach(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| QlessError::Detached(self.name.clone()))
    }

    /// Enqueues a job and returns its jid.
    pub async fn put(&self, klass: &str, data: &Value, options: PutOptions) -> Result<String> {
        let client = self.client()?;
        let jid = options.jid.unwrap_or_else(|| client.generate_jid());

        let mut invocation = Invocation::new(Opcode::Put)
            .arg(&self.name)
            .arg(&jid)
            .arg(klass)
            .arg(encode_payload(data))
            .arg(options.delay);
        if let Some(priority) = options.priority {
            invocation = invocation.arg("priority").arg(priority);
        }
        if !options.tags.is_empty() {
            invocation = invocation
                .arg("tags")
                .arg(serde_json::to_string(&options.tags)?);
        }
        if let Some(retries) = options.retries {
            invocation = invocation.arg("retries").arg(retries);
        }
        if !options.depends.is_empty() {
            invocation = invocation
                .arg("depends")
                .arg(serde_json::to_string(&options.depends)?);
        }

        let reply = client.call(invocation).await?;
        let jid = decode_string(Opcode::Put.as_str(), reply)?;
        debug!(queue = %self.name, jid = %jid, klass, "Put job");
        Ok(jid)
    }

    /// Leases up to `count` jobs to this client's worker.
    pub async fn pop(&self, count: usize) -> Result<Vec<Job>> {
        let client = self.client()?;
        let reply = client
            .call(
                Invocation::new(Opcode::Pop)
                    .arg(&self.name)
                    .arg(client.worker_name())
                    .arg(count),
            )
            .await?;
        let jobs = Job::list_from_reply(client, Opcode::Pop.as_str(), reply)?;
        debug!(queue = %self.name, popped = jobs.len(), "Popped jobs");
        Ok(jobs)
    }

    /// Returns up to `count` jobs without leasing them.
    pub async fn peek(&self, count: usize) -> Result<Vec<Job>> {
        let client = self.client()?;
        let reply = client
            .call(Invocation::new(Opcode::Peek).arg(&self.name).arg(count))
            .await?;
        Job::list_from_reply(client, Opcode::Peek.as_str(), reply)
    }

    /// Registers a recurring job spawning every `interval` seconds and
    /// returns its jid.
    pub async fn recur(
        &self,
        klass: &str,
        data: &Value,
        interval: i64,
        options: RecurOptions,
    ) -> Result<String> {
        if interval <= 0 {
            return Err(QlessError::InvalidArgument(
                "recurrence interval must be positive".to_string(),
            ));
        }
        let client = self.client()?;
        let jid = options.jid.unwrap_or_else(|| client.generate_jid());

        let mut invocation = Invocation::new(Opcode::Recur)
            .arg("on")
            .arg(&self.name)
            .arg(&jid)
            .arg(klass)
            .arg(encode_payload(data))
            .arg("interval")
            .arg(interval)
            .arg(options.offset);
        if let Some(priority) = options.priority {
            invocation = invocation.arg("priority").arg(priority);
        }
        if !options.tags.is_empty() {
            invocation = invocation
                .arg("tags")
                .arg(serde_json::to_string(&options.tags)?);
        }
        if let Some(retries) = options.retries {
            invocation = invocation.arg("retries").arg(retries);
        }

        let reply = client.call(invocation).await?;
        let jid = decode_string(Opcode::Recur.as_str(), reply)?;
        debug!(queue = %self.name, jid = %jid, interval, "Registered recurring job");
        Ok(jid)
    }

    /// Jids of jobs in this queue in `state`.
    pub async fn jobs(&self, state: JobState, start: usize, count: usize) -> Result<Vec<String>> {
        if !state.is_listable() {
            return Err(QlessError::InvalidArgument(format!(
                "queues cannot list jobs in state '{}'",
                state
            )));
        }
        let client = self.client()?;
        let reply = client
            .call(
                Invocation::new(Opcode::Jobs)
                    .arg(state.as_str())
                    .arg(&self.name)
                    .arg(start)
                    .arg(count),
            )
            .await?;
        decode_string_list(Opcode::Jobs.as_str(), reply)
    }
}
