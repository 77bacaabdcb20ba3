//! Top-level client.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::events::Events;
use super::queue::Queue;
use crate::config::ClientConfig;
use crate::error::{QlessError, Result};
use crate::job::{JidGenerator, Job, RecurringJob, UuidJidGenerator};
use crate::script::{RedisTransport, ScriptDispatcher, ScriptSource, Transport};
use crate::wire::codec::deserialize_string_list;
use crate::wire::{
    decode_bool, decode_json, decode_string_list, Clock, ConfigValue, Invocation, Opcode, Reply,
    SystemClock,
};

/// Result of resolving an identifier that may name a job or a recurring
/// template.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Job(Job),
    Recurring(RecurringJob),
}

impl Lookup {
    pub fn jid(&self) -> &str {
        match self {
            Lookup::Job(job) => &job.jid,
            Lookup::Recurring(job) => &job.jid,
        }
    }
}

/// Reply of a tag query: the total number of tagged jobs and one page of
/// their jids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaggedReply {
    #[serde(default)]
    pub total: i64,
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub jobs: Vec<String>,
}

/// Tracked jobs, plus the jids of tracked jobs that no longer exist.
#[derive(Debug, Clone, Default)]
pub struct TrackedReply {
    pub jobs: Vec<Job>,
    pub expired: Vec<String>,
}

#[derive(Deserialize)]
struct TrackedRecord {
    #[serde(default)]
    jobs: Value,
    #[serde(default, deserialize_with = "deserialize_string_list")]
    expired: Vec<String>,
}

struct ClientInner {
    dispatcher: ScriptDispatcher,
    jids: Arc<dyn JidGenerator>,
    script_name: String,
    worker_name: String,
    redis_url: Option<String>,
    events: OnceLock<Events>,
}

/// Handle to a qless deployment.
///
/// Cloning is cheap; clones share the dispatcher and its script cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("script", &self.inner.script_name)
            .field("worker", &self.inner.worker_name)
            .field("redis_url", &self.inner.redis_url)
            .finish()
    }
}

/// Builds a [`Client`] over an arbitrary transport.
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    script: ScriptSource,
    clock: Arc<dyn Clock>,
    jids: Arc<dyn JidGenerator>,
    worker_name: String,
    redis_url: Option<String>,
}

impl ClientBuilder {
    pub fn new(transport: Arc<dyn Transport>, script: ScriptSource) -> Self {
        Self {
            transport,
            script,
            clock: Arc::new(SystemClock),
            jids: Arc::new(UuidJidGenerator),
            worker_name: ClientConfig::default().worker_name,
            redis_url: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jid_generator(mut self, jids: Arc<dyn JidGenerator>) -> Self {
        self.jids = jids;
        self
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// URL used for event subscriptions.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn build(self) -> Client {
        let script_name = self.script.name().to_string();
        let dispatcher = ScriptDispatcher::new(self.transport, self.clock).with_script(self.script);
        Client {
            inner: Arc::new(ClientInner {
                dispatcher,
                jids: self.jids,
                script_name,
                worker_name: self.worker_name,
                redis_url: self.redis_url,
                events: OnceLock::new(),
            }),
        }
    }
}

impl Client {
    /// Connects to Redis, reads the script library from
    /// `config.script_path` and loads it.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let url = config.connection_url();

        let transport = RedisTransport::connect(&url).await?;
        let script = ScriptSource::from_file(&config.script_name, &config.script_path).await?;

        let client = ClientBuilder::new(Arc::new(transport), script)
            .with_worker_name(config.worker_name)
            .with_redis_url(url)
            .build();
        client.inner.dispatcher.preload().await?;

        info!(
            script = %client.inner.script_name,
            worker = %client.inner.worker_name,
            "Connected to qless"
        );
        Ok(client)
    }

    /// Returns true if both handles share the same connection state.
    pub fn ptr_eq(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn worker_name(&self) -> &str {
        &self.inner.worker_name
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> i64 {
        self.inner.dispatcher.clock().now()
    }

    /// Runs an invocation through a named script.
    pub async fn invoke(&self, script_name: &str, invocation: Invocation) -> Result<Reply> {
        self.inner.dispatcher.invoke(script_name, &invocation).await
    }

    /// Runs an invocation through the qless script library.
    pub async fn call(&self, invocation: Invocation) -> Result<Reply> {
        self.invoke(&self.inner.script_name, invocation).await
    }

    /// A handle on the queue `name`. Performs no remote call.
    pub fn queue(&self, name: impl Into<String>) -> Queue {
        Queue::new(self.clone(), name)
    }

    /// Queue records with their job counts.
    ///
    /// An empty `name` lists every queue. A non-empty name decodes the single
    /// record for that queue, returned as a one-element list.
    pub async fn queues(&self, name: &str) -> Result<Vec<Queue>> {
        let op = Opcode::Queues.as_str();
        let mut invocation = Invocation::new(Opcode::Queues);
        if !name.is_empty() {
            invocation = invocation.arg(name);
        }
        let reply = self.call(invocation).await?;

        if name.is_empty() {
            let value: Value = decode_json(op, reply)?;
            let records = match value {
                Value::Array(items) => items,
                Value::Object(ref map) if map.is_empty() => Vec::new(),
                other => {
                    return Err(QlessError::decode(
                        op,
                        other.to_string().into_bytes(),
                        "expected a list of queues",
                    ))
                }
            };
            records
                .into_iter()
                .map(|record| {
                    serde_json::from_value::<Queue>(record.clone())
                        .map(|queue| queue.attach(self.clone()))
                        .map_err(|e| {
                            QlessError::decode(op, record.to_string().into_bytes(), e.to_string())
                        })
                })
                .collect()
        } else {
            let queue: Queue = decode_json(op, reply)?;
            Ok(vec![queue.attach(self.clone())])
        }
    }

    /// Creates a job locally with a fresh jid. Nothing is sent until it is
    /// moved into a queue.
    pub fn new_job(&self, klass: impl Into<String>, queue: impl Into<String>, data: Value) -> Job {
        Job::new(self.clone(), self.inner.jids.generate(), klass, queue, data)
    }

    pub(crate) fn generate_jid(&self) -> String {
        self.inner.jids.generate()
    }

    /// Starts tracking `jid`.
    pub async fn track(&self, jid: &str) -> Result<bool> {
        let reply = self
            .call(Invocation::new(Opcode::Track).arg("track").arg(jid))
            .await?;
        decode_bool(Opcode::Track.as_str(), reply)
    }

    /// Stops tracking `jid`.
    pub async fn untrack(&self, jid: &str) -> Result<bool> {
        let reply = self
            .call(Invocation::new(Opcode::Track).arg("untrack").arg(jid))
            .await?;
        decode_bool(Opcode::Track.as_str(), reply)
    }

    /// Every tracked job.
    pub async fn tracked(&self) -> Result<TrackedReply> {
        let op = Opcode::Track.as_str();
        let reply = self.call(Invocation::new(Opcode::Track)).await?;
        let record: TrackedRecord = decode_json(op, reply)?;
        let jobs = Job::list_from_reply(self, op, Reply::bytes(record.jobs.to_string()))?;
        Ok(TrackedReply {
            jobs,
            expired: record.expired,
        })
    }

    /// Resolves `jid` as a job, falling back to a recurring template when
    /// no job has that identifier.
    pub async fn get(&self, jid: &str) -> Result<Lookup> {
        match self.get_job(jid).await {
            Ok(job) => Ok(Lookup::Job(job)),
            Err(err) if err.is_not_found() => {
                debug!(jid, "No job found, trying recurring jobs");
                self.get_recurring_job(jid).await.map(Lookup::Recurring)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_job(&self, jid: &str) -> Result<Job> {
        let reply = self.call(Invocation::new(Opcode::Get).arg(jid)).await?;
        Job::from_reply(self, Opcode::Get.as_str(), reply)
    }

    pub async fn get_recurring_job(&self, jid: &str) -> Result<RecurringJob> {
        let reply = self
            .call(Invocation::new(Opcode::Recur).arg("get").arg(jid))
            .await?;
        RecurringJob::from_reply(self, Opcode::Recur.as_str(), reply)
    }

    /// Jids of completed jobs, most recent first.
    pub async fn completed(&self, start: usize, count: usize) -> Result<Vec<String>> {
        let reply = self
            .call(
                Invocation::new(Opcode::Jobs)
                    .arg("complete")
                    .arg(start)
                    .arg(count),
            )
            .await?;
        decode_string_list(Opcode::Jobs.as_str(), reply)
    }

    /// One page of the jids tagged with `tag`.
    pub async fn tagged(&self, tag: &str, start: usize, count: usize) -> Result<TaggedReply> {
        let reply = self
            .call(
                Invocation::new(Opcode::Tag)
                    .arg("get")
                    .arg(tag)
                    .arg(start)
                    .arg(count),
            )
            .await?;
        decode_json("tag.get", reply)
    }

    /// Reads a config option. Integers are rendered in base 10.
    pub async fn get_config(&self, option: &str) -> Result<String> {
        let reply = self
            .call(Invocation::new(Opcode::ConfigGet).arg(option))
            .await?;
        ConfigValue::from_reply(option, reply).map(ConfigValue::into_string)
    }

    pub async fn set_config(&self, option: &str, value: &str) -> Result<()> {
        self.call(Invocation::new(Opcode::ConfigSet).arg(option).arg(value))
            .await?;
        debug!(option, value, "Set config option");
        Ok(())
    }

    pub async fn unset_config(&self, option: &str) -> Result<()> {
        self.call(Invocation::new(Opcode::ConfigUnset).arg(option))
            .await?;
        debug!(option, "Unset config option");
        Ok(())
    }

    /// Event subscriptions, built on first use.
    pub fn events(&self) -> Result<&Events> {
        if let Some(events) = self.inner.events.get() {
            return Ok(events);
        }
        let url = self.inner.redis_url.as_deref().ok_or_else(|| {
            QlessError::InvalidArgument("client was built without a Redis URL".to_string())
        })?;
        let events = Events::new(url)?;
        Ok(self.inner.events.get_or_init(|| events))
    }
}
