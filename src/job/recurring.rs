//! Recurring job templates.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::Client;
use crate::error::{QlessError, Result};
use crate::wire::codec::{deserialize_payload, deserialize_string_list};
use crate::wire::{decode_json, empty_payload, encode_payload, Arg, Invocation, Opcode, Reply};

/// A template that makes the runtime spawn a job every `interval` seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringJob {
    pub jid: String,
    #[serde(default)]
    pub klass: String,
    #[serde(default)]
    pub queue: String,
    #[serde(default = "empty_payload", deserialize_with = "deserialize_payload")]
    pub data: Value,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub retries: i64,
    #[serde(default)]
    pub interval: i64,
    #[serde(default)]
    pub count: i64,
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub tags: Vec<String>,

    #[serde(skip)]
    client: Option<Client>,
}

impl PartialEq for RecurringJob {
    fn eq(&self, other: &Self) -> bool {
        self.jid == other.jid
            && self.klass == other.klass
            && self.queue == other.queue
            && self.data == other.data
            && self.priority == other.priority
            && self.retries == other.retries
            && self.interval == other.interval
            && self.count == other.count
            && self.tags == other.tags
    }
}

type Setter = fn(&mut RecurringJob, &Value) -> Result<Arg>;

/// Attributes `update` accepts, keyed by lowercase option name. Each setter
/// validates the value, applies it, and returns the argument to forward.
const UPDATABLE: &[(&str, Setter)] = &[
    ("priority", set_priority),
    ("retries", set_retries),
    ("interval", set_interval),
    ("data", set_data),
    ("klass", set_klass),
    ("queue", set_queue),
];

fn integer(key: &str, value: &Value) -> Result<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| {
            QlessError::InvalidArgument(format!("'{}' must be an integer, got {}", key, value))
        })
}

fn text(key: &str, value: &Value) -> Result<String> {
    match value.as_str() {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(QlessError::InvalidArgument(format!(
            "'{}' must be a non-empty string, got {}",
            key, value
        ))),
    }
}

fn set_priority(job: &mut RecurringJob, value: &Value) -> Result<Arg> {
    job.priority = integer("priority", value)?;
    Ok(Arg::Int(job.priority))
}

fn set_retries(job: &mut RecurringJob, value: &Value) -> Result<Arg> {
    let retries = integer("retries", value)?;
    if retries < 0 {
        return Err(QlessError::InvalidArgument(
            "'retries' must not be negative".to_string(),
        ));
    }
    job.retries = retries;
    Ok(Arg::Int(retries))
}

fn set_interval(job: &mut RecurringJob, value: &Value) -> Result<Arg> {
    let interval = integer("interval", value)?;
    if interval <= 0 {
        return Err(QlessError::InvalidArgument(
            "'interval' must be positive".to_string(),
        ));
    }
    job.interval = interval;
    Ok(Arg::Int(interval))
}

fn set_data(job: &mut RecurringJob, value: &Value) -> Result<Arg> {
    job.data = if value.is_null() {
        empty_payload()
    } else {
        value.clone()
    };
    Ok(Arg::Str(encode_payload(value)))
}

fn set_klass(job: &mut RecurringJob, value: &Value) -> Result<Arg> {
    job.klass = text("klass", value)?;
    Ok(Arg::from(&job.klass))
}

fn set_queue(job: &mut RecurringJob, value: &Value) -> Result<Arg> {
    job.queue = text("queue", value)?;
    Ok(Arg::from(&job.queue))
}

impl RecurringJob {
    pub(crate) fn from_reply(client: &Client, op: &str, reply: Reply) -> Result<Self> {
        let mut job: RecurringJob = decode_json(op, reply)?;
        job.client = Some(client.clone());
        Ok(job)
    }

    pub fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| QlessError::Detached(self.jid.clone()))
    }

    pub fn set_client(&mut self, client: Client) {
        self.client = Some(client);
    }

    /// Updates template attributes.
    ///
    /// Keys are matched case-insensitively against priority, retries,
    /// interval, data, klass and queue; anything else is ignored. Values are
    /// validated before any remote call, and the local instance only changes
    /// once the runtime accepted the update. Returns the number of
    /// attributes forwarded.
    pub async fn update<I, K>(&mut self, options: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut staged = self.clone();
        let mut forwarded: Vec<Arg> = Vec::new();

        for (key, value) in options {
            let key = key.as_ref().to_lowercase();
            match UPDATABLE.iter().find(|(name, _)| *name == key) {
                Some((name, setter)) => {
                    let arg = setter(&mut staged, &value)?;
                    forwarded.push(Arg::from(*name));
                    forwarded.push(arg);
                }
                None => debug!(jid = %self.jid, key = %key, "Ignoring unknown recurring job option"),
            }
        }

        if forwarded.is_empty() {
            return Ok(0);
        }

        let count = forwarded.len() / 2;
        self.client()?
            .call(
                Invocation::new(Opcode::Recur)
                    .arg("update")
                    .arg(&self.jid)
                    .args(forwarded),
            )
            .await?;

        debug!(jid = %self.jid, attributes = count, "Updated recurring job");
        *self = staged;
        Ok(count)
    }

    /// Turns the recurrence off. This instance is stale afterwards.
    pub async fn cancel(&self) -> Result<()> {
        self.client()?
            .call(Invocation::new(Opcode::Recur).arg("off").arg(&self.jid))
            .await?;
        debug!(jid = %self.jid, "Cancelled recurring job");
        Ok(())
    }

    /// Adds tags to the template.
    ///
    /// The local `tags` are left untouched; refetch to observe the new set.
    pub async fn tag(&self, tags: &[&str]) -> Result<()> {
        self.edit_tags("tag", tags).await
    }

    /// Removes tags from the template. Like [`tag`](Self::tag), this does
    /// not update the local instance.
    pub async fn untag(&self, tags: &[&str]) -> Result<()> {
        self.edit_tags("untag", tags).await
    }

    async fn edit_tags(&self, action: &str, tags: &[&str]) -> Result<()> {
        self.client()?
            .call(
                Invocation::new(Opcode::Recur)
                    .arg(action)
                    .arg(&self.jid)
                    .args(tags.iter().copied()),
            )
            .await?;
        Ok(())
    }
}
