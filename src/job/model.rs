//! Job entity and its remote lifecycle operations.
//!
//! A [`Job`] is a client-side projection of a job record held by the script
//! runtime. Every mutating method performs exactly one remote call and, on
//! success, updates the local projection to match. State-changing calls on
//! a job whose lease was lost fail with [`QlessError::LeaseLost`] and are
//! never retried here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::Client;
use crate::error::{QlessError, Result};
use crate::wire::codec::{deserialize_payload, deserialize_string_list};
use crate::wire::{
    decode_bool, decode_integer, decode_json, decode_string, empty_payload, encode_payload,
    Invocation, Opcode, Reply, NO_DATA_SENTINEL,
};

/// Default retry budget for jobs created on the client side.
pub const DEFAULT_RETRIES: i64 = 5;

/// Client-observed state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Waiting,
    Running,
    Stalled,
    Scheduled,
    Depends,
    Recurring,
    #[serde(alias = "complete")]
    Completed,
    Failed,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Running => "running",
            JobState::Stalled => "stalled",
            JobState::Scheduled => "scheduled",
            JobState::Depends => "depends",
            JobState::Recurring => "recurring",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// States a queue can list jobs by.
    pub fn is_listable(&self) -> bool {
        matches!(
            self,
            JobState::Running
                | JobState::Stalled
                | JobState::Scheduled
                | JobState::Depends
                | JobState::Recurring
        )
    }

    /// Whether the server has finished with the job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QlessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "waiting" => Ok(JobState::Waiting),
            "running" => Ok(JobState::Running),
            "stalled" => Ok(JobState::Stalled),
            "scheduled" => Ok(JobState::Scheduled),
            "depends" => Ok(JobState::Depends),
            "recurring" => Ok(JobState::Recurring),
            "complete" | "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "canceled" | "cancelled" => Ok(JobState::Cancelled),
            other => Err(QlessError::InvalidArgument(format!(
                "unknown job state '{}'",
                other
            ))),
        }
    }
}

/// One entry of a job's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub when: i64,
    #[serde(default, rename = "q")]
    pub queue: String,
    #[serde(default, rename = "what")]
    pub event: String,
    #[serde(default)]
    pub worker: String,
}

/// Failure details recorded when a job fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub when: i64,
    #[serde(default)]
    pub worker: String,
}

/// A unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub jid: String,
    #[serde(default)]
    pub klass: String,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub worker: String,
    #[serde(default)]
    pub tracked: bool,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub priority: i64,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub expires: i64,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub retries: i64,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub remaining: i64,
    #[serde(default = "empty_payload", deserialize_with = "deserialize_payload")]
    pub data: Value,
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_history")]
    pub history: Vec<HistoryEntry>,
    #[serde(default, deserialize_with = "deserialize_failure")]
    pub failure: Option<Failure>,
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub dependents: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub dependencies: Vec<String>,

    #[serde(skip)]
    client: Option<Client>,
}

impl PartialEq for Job {
    // The client back-reference is not part of a job's identity.
    fn eq(&self, other: &Self) -> bool {
        self.jid == other.jid
            && self.klass == other.klass
            && self.state == other.state
            && self.queue == other.queue
            && self.worker == other.worker
            && self.tracked == other.tracked
            && self.priority == other.priority
            && self.expires == other.expires
            && self.retries == other.retries
            && self.remaining == other.remaining
            && self.data == other.data
            && self.tags == other.tags
            && self.history == other.history
            && self.failure == other.failure
            && self.dependents == other.dependents
            && self.dependencies == other.dependencies
    }
}

impl Job {
    /// Creates a job that has not been enqueued yet.
    pub(crate) fn new(
        client: Client,
        jid: String,
        klass: impl Into<String>,
        queue: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            jid,
            klass: klass.into(),
            state: JobState::Waiting,
            queue: queue.into(),
            worker: String::new(),
            tracked: false,
            priority: 0,
            expires: 0,
            retries: DEFAULT_RETRIES,
            remaining: DEFAULT_RETRIES,
            data: if data.is_null() { empty_payload() } else { data },
            tags: Vec::new(),
            history: Vec::new(),
            failure: None,
            dependents: Vec::new(),
            dependencies: Vec::new(),
            client: Some(client),
        }
    }

    /// Decodes a single job record and attaches `client`.
    pub(crate) fn from_reply(client: &Client, op: &str, reply: Reply) -> Result<Self> {
        let job: Job = decode_json(op, reply)?;
        Ok(job.attach(client.clone()))
    }

    /// Decodes a list of job records, attaching `client` to each.
    pub(crate) fn list_from_reply(client: &Client, op: &str, reply: Reply) -> Result<Vec<Self>> {
        let value: Value = decode_json(op, reply)?;
        let records = match value {
            Value::Array(items) => items,
            // An empty list is encoded as an empty table.
            Value::Object(ref map) if map.is_empty() => Vec::new(),
            Value::Null => Vec::new(),
            other => {
                return Err(QlessError::decode(
                    op,
                    other.to_string().into_bytes(),
                    "expected a list of jobs",
                ))
            }
        };

        records
            .into_iter()
            .map(|record| {
                serde_json::from_value::<Job>(record.clone())
                    .map(|job| job.attach(client.clone()))
                    .map_err(|e| QlessError::decode(op, record.to_string().into_bytes(), e.to_string()))
            })
            .collect()
    }

    pub(crate) fn attach(mut self, client: Client) -> Self {
        self.remaining = self.remaining.min(self.retries);
        self.client = Some(client);
        self
    }

    /// The client this job performs remote operations through.
    pub fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| QlessError::Detached(self.jid.clone()))
    }

    pub fn set_client(&mut self, client: Client) {
        self.client = Some(client);
    }

    async fn call(&self, invocation: Invocation) -> Result<Reply> {
        self.client()?.call(invocation).await
    }

    /// Moves the job into `queue`, resetting its lease.
    ///
    /// Returns the jid acknowledged by the runtime.
    pub async fn move_to(&mut self, queue: &str) -> Result<String> {
        let reply = self
            .call(
                Invocation::new(Opcode::Put)
                    .arg(queue)
                    .arg(&self.jid)
                    .arg(&self.klass)
                    .arg(encode_payload(&self.data))
                    .arg(0),
            )
            .await?;
        let jid = decode_string(Opcode::Put.as_str(), reply)?;

        debug!(jid = %self.jid, queue, "Moved job");
        self.queue = queue.to_string();
        self.state = JobState::Waiting;
        self.worker.clear();
        self.expires = 0;
        Ok(jid)
    }

    /// Marks the job failed with a failure `group` and `message`.
    pub async fn fail(&mut self, group: &str, message: &str) -> Result<()> {
        let op = Opcode::Fail.as_str();
        let reply = self
            .call(
                Invocation::new(Opcode::Fail)
                    .arg(&self.jid)
                    .arg(&self.worker)
                    .arg(group)
                    .arg(message)
                    .arg(encode_payload(&self.data)),
            )
            .await?;
        if !decode_bool(op, reply)? {
            return Err(self.lease_lost(op));
        }

        let when = self.client()?.now();
        debug!(jid = %self.jid, group, "Failed job");
        self.failure = Some(Failure {
            group: group.to_string(),
            message: message.to_string(),
            when,
            worker: std::mem::take(&mut self.worker),
        });
        self.state = JobState::Failed;
        self.remaining = (self.remaining - 1).clamp(0, self.retries.max(0));
        Ok(())
    }

    /// Renews the lease, sending the current payload.
    ///
    /// Returns the new lease expiry.
    pub async fn heartbeat(&mut self) -> Result<i64> {
        let data = encode_payload(&self.data);
        self.send_heartbeat(Some(data)).await
    }

    /// Renews the lease without re-sending the payload.
    pub async fn heartbeat_with_no_data(&mut self) -> Result<i64> {
        self.send_heartbeat(None).await
    }

    async fn send_heartbeat(&mut self, data: Option<String>) -> Result<i64> {
        let op = Opcode::Heartbeat.as_str();
        let mut invocation = Invocation::new(Opcode::Heartbeat)
            .arg(&self.jid)
            .arg(&self.worker);
        if let Some(data) = data {
            invocation = invocation.arg(data);
        }

        let reply = self.call(invocation).await?;
        if is_rejection(&reply) {
            return Err(self.lease_lost(op));
        }
        let expires = decode_integer(op, reply)?;

        debug!(jid = %self.jid, expires, "Heartbeat");
        self.expires = expires;
        Ok(expires)
    }

    /// Completes the job in its current queue.
    ///
    /// Returns the state the runtime moved the job into.
    pub async fn complete(&mut self) -> Result<JobState> {
        let data = encode_payload(&self.data);
        self.send_complete(data, None).await
    }

    /// Completes the job, sending the fixed no-data sentinel instead of the
    /// payload.
    pub async fn complete_with_no_data(&mut self) -> Result<JobState> {
        self.send_complete(NO_DATA_SENTINEL.to_string(), None).await
    }

    /// Completes the job and enqueues it into `next_queue`.
    pub async fn complete_and_advance(&mut self, next_queue: &str) -> Result<JobState> {
        let data = encode_payload(&self.data);
        self.send_complete(data, Some(next_queue)).await
    }

    async fn send_complete(&mut self, data: String, next_queue: Option<&str>) -> Result<JobState> {
        let op = Opcode::Complete.as_str();
        let mut invocation = Invocation::new(Opcode::Complete)
            .arg(&self.jid)
            .arg(&self.worker)
            .arg(&self.queue)
            .arg(data);
        if let Some(next) = next_queue {
            invocation = invocation.arg("next").arg(next);
        }

        let reply = self.call(invocation).await?;
        if is_rejection(&reply) {
            return Err(self.lease_lost(op));
        }
        let state: JobState = decode_string(op, reply)?.parse()?;

        debug!(jid = %self.jid, state = %state, "Completed job");
        if let Some(next) = next_queue {
            self.queue = next.to_string();
        }
        self.state = state;
        self.worker.clear();
        Ok(state)
    }

    /// Cancels the job. The runtime removes it along with its history.
    pub async fn cancel(&mut self) -> Result<()> {
        self.call(Invocation::new(Opcode::Cancel).arg(&self.jid))
            .await?;
        debug!(jid = %self.jid, "Cancelled job");
        self.state = JobState::Cancelled;
        self.worker.clear();
        Ok(())
    }

    /// Starts tracking the job.
    pub async fn track(&mut self) -> Result<bool> {
        let reply = self
            .call(Invocation::new(Opcode::Track).arg("track").arg(&self.jid))
            .await?;
        let tracked = decode_bool(Opcode::Track.as_str(), reply)?;
        if tracked {
            self.tracked = true;
        }
        Ok(tracked)
    }

    /// Stops tracking the job.
    pub async fn untrack(&mut self) -> Result<bool> {
        let reply = self
            .call(Invocation::new(Opcode::Track).arg("untrack").arg(&self.jid))
            .await?;
        let untracked = decode_bool(Opcode::Track.as_str(), reply)?;
        if untracked {
            self.tracked = false;
        }
        Ok(untracked)
    }

    /// Adds tags, returning the job's resulting tag list.
    pub async fn tag(&mut self, tags: &[&str]) -> Result<Vec<String>> {
        self.edit_tags("add", tags).await
    }

    /// Removes tags, returning the job's resulting tag list.
    pub async fn untag(&mut self, tags: &[&str]) -> Result<Vec<String>> {
        self.edit_tags("remove", tags).await
    }

    async fn edit_tags(&mut self, action: &str, tags: &[&str]) -> Result<Vec<String>> {
        let op = Opcode::Tag.as_str();
        let reply = self
            .call(
                Invocation::new(Opcode::Tag)
                    .arg(action)
                    .arg(&self.jid)
                    .args(tags.iter().copied()),
            )
            .await?;
        let value: Value = decode_json(op, reply)?;
        let updated = deserialize_string_list(value)
            .map_err(|e| QlessError::decode(op, Vec::new(), e.to_string()))?;

        self.tags = updated.clone();
        Ok(updated)
    }

    /// Gives the job back to its queue after `delay` seconds, consuming one
    /// retry.
    ///
    /// Returns the retries remaining. A negative count means the budget was
    /// exhausted and the runtime failed the job permanently.
    pub async fn retry(&mut self, delay: i64) -> Result<i64> {
        let op = Opcode::Retry.as_str();
        let reply = self
            .call(
                Invocation::new(Opcode::Retry)
                    .arg(&self.jid)
                    .arg(&self.queue)
                    .arg(&self.worker)
                    .arg(delay),
            )
            .await?;
        // Zero is a valid count here, so only nil and false are rejections.
        if matches!(reply, Reply::Nil) || reply == Reply::bytes("false") {
            return Err(self.lease_lost(op));
        }
        let remaining = decode_integer(op, reply)?;

        debug!(jid = %self.jid, remaining, "Retried job");
        let worker = std::mem::take(&mut self.worker);
        if remaining < 0 {
            self.state = JobState::Failed;
            self.remaining = 0;
            self.failure = Some(Failure {
                group: format!("failed-retries-{}", self.queue),
                message: format!(
                    "Job exhausted retries in queue \"{}\"",
                    self.queue
                ),
                when: self.client()?.now(),
                worker,
            });
        } else {
            self.state = if delay > 0 {
                JobState::Scheduled
            } else {
                JobState::Waiting
            };
            self.remaining = remaining.min(self.retries);
        }
        Ok(remaining)
    }

    /// Makes this job depend on `jids`.
    pub async fn depend(&mut self, jids: &[&str]) -> Result<bool> {
        let changed = self.edit_dependencies("on", jids).await?;
        if changed {
            for jid in jids {
                if !self.dependencies.iter().any(|d| d == jid) {
                    self.dependencies.push(jid.to_string());
                }
            }
            if !self.dependencies.is_empty() {
                self.state = JobState::Depends;
            }
        }
        Ok(changed)
    }

    /// Removes dependencies on `jids`.
    pub async fn undepend(&mut self, jids: &[&str]) -> Result<bool> {
        let changed = self.edit_dependencies("off", jids).await?;
        if changed {
            self.dependencies.retain(|d| !jids.contains(&d.as_str()));
            self.unblock_if_free();
        }
        Ok(changed)
    }

    /// Removes every dependency.
    pub async fn undepend_all(&mut self) -> Result<bool> {
        let changed = self.edit_dependencies("off", &["all"]).await?;
        if changed {
            self.dependencies.clear();
            self.unblock_if_free();
        }
        Ok(changed)
    }

    async fn edit_dependencies(&self, direction: &str, jids: &[&str]) -> Result<bool> {
        let reply = self
            .call(
                Invocation::new(Opcode::Depends)
                    .arg(&self.jid)
                    .arg(direction)
                    .args(jids.iter().copied()),
            )
            .await?;
        decode_bool(Opcode::Depends.as_str(), reply)
    }

    fn unblock_if_free(&mut self) {
        if self.dependencies.is_empty() && self.state == JobState::Depends {
            self.state = JobState::Waiting;
        }
    }

    fn lease_lost(&self, op: &str) -> QlessError {
        QlessError::LeaseLost {
            op: op.to_string(),
            message: format!(
                "{} rejected for job {} held by worker '{}'",
                op, self.jid, self.worker
            ),
        }
    }
}

/// Older runtimes answer a rejected lease operation with false or nil
/// instead of raising.
fn is_rejection(reply: &Reply) -> bool {
    match reply {
        Reply::Nil => true,
        Reply::Int(0) => true,
        Reply::Bytes(bytes) => bytes.as_slice() == b"false" || bytes.is_empty(),
        _ => false,
    }
}

fn deserialize_lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|f| f as i64)
            .unwrap_or_default(),
        Some(Value::Bool(b)) => i64::from(b),
        _ => 0,
    })
}

fn deserialize_history<'de, D>(deserializer: D) -> std::result::Result<Vec<HistoryEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(serde::de::Error::custom))
            .collect(),
        _ => Ok(Vec::new()),
    }
}

fn deserialize_failure<'de, D>(deserializer: D) -> std::result::Result<Option<Failure>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(map)) if !map.is_empty() => {
            serde_json::from_value(Value::Object(map))
                .map(Some)
                .map_err(serde::de::Error::custom)
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::script::mock::{test_client, MockTransport, TEST_NOW};
    use serde_json::json;

    const RUNNING_JOB: &str = r#"{
        "jid": "jid-9",
        "klass": "Mailer",
        "state": "running",
        "queue": "email",
        "worker": "worker-1",
        "tracked": false,
        "priority": 2,
        "expires": 1700000060.25,
        "retries": 3,
        "remaining": 3,
        "data": "{\"to\":\"a@example.com\"}",
        "tags": {},
        "history": [{"when": 1699999990, "q": "email", "what": "put", "worker": ""},
                    {"when": 1700000000, "q": "email", "what": "popped", "worker": "worker-1"}],
        "failure": {},
        "dependents": {},
        "dependencies": {}
    }"#;

    fn running_job(mock: &std::sync::Arc<MockTransport>) -> Job {
        let client = test_client(mock);
        Job::from_reply(&client, "get", Reply::bytes(RUNNING_JOB)).expect("valid job record")
    }

    #[test]
    fn test_decode_runtime_record() {
        let mock = MockTransport::new();
        let job = running_job(&mock);

        assert_eq!(job.jid, "jid-9");
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.expires, 1_700_000_060);
        assert_eq!(job.data, json!({"to": "a@example.com"}));
        assert!(job.tags.is_empty());
        assert!(job.failure.is_none());
        assert_eq!(job.history.len(), 2);
        assert_eq!(job.history[1].event, "popped");
        assert_eq!(job.history[1].queue, "email");
        assert!(job.client().is_ok());
    }

    #[test]
    fn test_absent_data_round_trips_as_empty_payload() {
        let mock = MockTransport::new();
        let client = test_client(&mock);

        let absent = Job::from_reply(&client, "get", Reply::bytes(r#"{"jid": "j"}"#)).unwrap();
        let explicit =
            Job::from_reply(&client, "get", Reply::bytes(r#"{"jid": "j", "data": "{}"}"#)).unwrap();
        assert_eq!(absent, explicit);

        let encoded = serde_json::to_string(&absent).unwrap();
        let decoded: Job = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, explicit);
        assert_eq!(encode_payload(&decoded.data), "{}");
    }

    #[test]
    fn test_decode_clamps_remaining_to_retries() {
        let mock = MockTransport::new();
        let client = test_client(&mock);
        let job = Job::from_reply(
            &client,
            "get",
            Reply::bytes(r#"{"jid": "j", "retries": 2, "remaining": 7}"#),
        )
        .unwrap();
        assert_eq!(job.remaining, 2);
    }

    #[test]
    fn test_job_state_parsing() {
        assert_eq!("complete".parse::<JobState>().unwrap(), JobState::Completed);
        assert_eq!("canceled".parse::<JobState>().unwrap(), JobState::Cancelled);
        assert_eq!("Waiting".parse::<JobState>().unwrap(), JobState::Waiting);
        assert!("bogus".parse::<JobState>().is_err());
        assert!(JobState::Stalled.is_listable());
        assert!(!JobState::Waiting.is_listable());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_detached_job_reports_error() {
        let job: Job = serde_json::from_str(r#"{"jid": "loose"}"#).unwrap();
        assert!(matches!(job.client(), Err(QlessError::Detached(ref jid)) if jid == "loose"));
    }

    #[tokio::test]
    async fn test_move_to_sends_put_and_resets_lease() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);
        mock.push_reply(Reply::bytes("jid-9"));

        let jid = job.move_to("priority-email").await.unwrap();

        assert_eq!(jid, "jid-9");
        assert_eq!(
            mock.last_call(),
            vec![
                "put",
                "priority-email",
                "jid-9",
                "Mailer",
                r#"{"to":"a@example.com"}"#,
                "0"
            ]
        );
        assert_eq!(job.queue, "priority-email");
        assert_eq!(job.state, JobState::Waiting);
        assert!(job.worker.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_expiry() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);
        mock.push_reply(Reply::bytes("1700000120"));

        let expires = job.heartbeat().await.unwrap();

        assert_eq!(expires, 1_700_000_120);
        assert_eq!(job.expires, 1_700_000_120);
        assert_eq!(
            mock.last_call(),
            vec!["heartbeat", "jid-9", "worker-1", r#"{"to":"a@example.com"}"#]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_with_no_data_omits_payload() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);
        mock.push_reply(Reply::Int(1_700_000_120));

        job.heartbeat_with_no_data().await.unwrap();

        assert_eq!(mock.last_call(), vec!["heartbeat", "jid-9", "worker-1"]);
    }

    #[tokio::test]
    async fn test_heartbeat_rejection_is_lease_lost() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);
        mock.push_reply(Reply::bytes("false"));

        let err = job.heartbeat().await.unwrap_err();
        assert!(err.is_lease_lost());
        assert_eq!(job.expires, 1_700_000_060);
    }

    #[tokio::test]
    async fn test_heartbeat_after_cancel_is_not_silent() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);

        job.cancel().await.unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert_eq!(mock.last_call(), vec!["cancel", "jid-9"]);

        mock.push_error(TransportError::Script(
            "Heartbeat(): Job does not exist".to_string(),
        ));
        let err = job.heartbeat().await.unwrap_err();
        assert!(err.is_not_found() || err.is_lease_lost());

        // Older runtimes answer with false instead of raising.
        mock.push_reply(Reply::Nil);
        let err = job.heartbeat().await.unwrap_err();
        assert!(err.is_lease_lost());
        assert_eq!(mock.loads(), 1, "lease errors never trigger reloads");
    }

    #[tokio::test]
    async fn test_complete_variants() {
        let mock = MockTransport::new();

        let mut job = running_job(&mock);
        mock.push_reply(Reply::bytes("complete"));
        assert_eq!(job.complete().await.unwrap(), JobState::Completed);
        assert_eq!(
            mock.last_call(),
            vec!["complete", "jid-9", "worker-1", "email", r#"{"to":"a@example.com"}"#]
        );
        assert!(job.worker.is_empty());

        let mut job = running_job(&mock);
        mock.push_reply(Reply::bytes("complete"));
        job.complete_with_no_data().await.unwrap();
        assert_eq!(mock.last_call()[4], NO_DATA_SENTINEL);
        assert_ne!(NO_DATA_SENTINEL, crate::wire::EMPTY_PAYLOAD);

        let mut job = running_job(&mock);
        mock.push_reply(Reply::bytes("waiting"));
        assert_eq!(
            job.complete_and_advance("archive").await.unwrap(),
            JobState::Waiting
        );
        let call = mock.last_call();
        assert_eq!(&call[5..], &["next".to_string(), "archive".to_string()]);
        assert_eq!(job.queue, "archive");
    }

    #[tokio::test]
    async fn test_complete_by_other_worker_is_lease_lost() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);
        mock.push_error(TransportError::Script(
            "Complete(): Job being worked on by another worker: worker-2".to_string(),
        ));

        let err = job.complete().await.unwrap_err();
        match err {
            QlessError::LeaseLost { op, message } => {
                assert_eq!(op, "complete");
                assert!(message.contains("worker-2"), "message kept verbatim");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(job.state, JobState::Running);
        assert_eq!(mock.calls().len(), 1, "no automatic retry");
    }

    #[tokio::test]
    async fn test_fail_records_failure() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);
        mock.push_reply(Reply::bytes("jid-9"));

        job.fail("smtp-error", "connection refused").await.unwrap();

        assert_eq!(
            mock.last_call(),
            vec![
                "fail",
                "jid-9",
                "worker-1",
                "smtp-error",
                "connection refused",
                r#"{"to":"a@example.com"}"#
            ]
        );
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.remaining, 2);
        assert!(job.worker.is_empty());
        let failure = job.failure.as_ref().expect("failure recorded");
        assert_eq!(failure.group, "smtp-error");
        assert_eq!(failure.worker, "worker-1");
        assert_eq!(failure.when, TEST_NOW);
    }

    #[tokio::test]
    async fn test_retry_transitions() {
        let mock = MockTransport::new();

        let mut job = running_job(&mock);
        mock.push_reply(Reply::Int(2));
        assert_eq!(job.retry(0).await.unwrap(), 2);
        assert_eq!(mock.last_call(), vec!["retry", "jid-9", "email", "worker-1", "0"]);
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.remaining, 2);

        let mut job = running_job(&mock);
        mock.push_reply(Reply::Int(1));
        job.retry(30).await.unwrap();
        assert_eq!(job.state, JobState::Scheduled);

        let mut job = running_job(&mock);
        mock.push_reply(Reply::Int(-1));
        assert_eq!(job.retry(0).await.unwrap(), -1);
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.remaining, 0);
        assert_eq!(
            job.failure.as_ref().map(|f| f.group.as_str()),
            Some("failed-retries-email")
        );
    }

    #[tokio::test]
    async fn test_remaining_never_exceeds_retries() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);

        // A misbehaving runtime reporting more retries than configured.
        let replies = [Reply::Int(9), Reply::Int(2), Reply::Int(5), Reply::Int(-1)];
        for reply in replies {
            mock.push_reply(reply);
            job.retry(0).await.unwrap();
            assert!(job.remaining <= job.retries);

            mock.push_reply(Reply::bytes("jid-9"));
            job.fail("group", "message").await.unwrap();
            assert!(job.remaining <= job.retries);
            assert!(job.remaining >= 0);
            assert!(job.failure.is_some());
        }
    }

    #[tokio::test]
    async fn test_tag_updates_local_tags() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);

        mock.push_json(r#"["urgent", "vip"]"#);
        let tags = job.tag(&["urgent", "vip"]).await.unwrap();
        assert_eq!(tags, vec!["urgent", "vip"]);
        assert_eq!(mock.last_call(), vec!["tag", "add", "jid-9", "urgent", "vip"]);
        assert_eq!(job.tags, tags);

        mock.push_json("{}");
        job.untag(&["urgent", "vip"]).await.unwrap();
        assert_eq!(mock.last_call()[1], "remove");
        assert!(job.tags.is_empty());
        assert_eq!(job.state, JobState::Running);
    }

    #[tokio::test]
    async fn test_dependencies() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);
        job.state = JobState::Waiting;

        mock.push_reply(Reply::bytes("true"));
        assert!(job.depend(&["a", "b"]).await.unwrap());
        assert_eq!(mock.last_call(), vec!["depends", "jid-9", "on", "a", "b"]);
        assert_eq!(job.dependencies, vec!["a", "b"]);
        assert_eq!(job.state, JobState::Depends);

        mock.push_reply(Reply::bytes("true"));
        job.undepend(&["a"]).await.unwrap();
        assert_eq!(job.dependencies, vec!["b"]);
        assert_eq!(job.state, JobState::Depends);

        mock.push_reply(Reply::bytes("true"));
        job.undepend_all().await.unwrap();
        assert_eq!(mock.last_call(), vec!["depends", "jid-9", "off", "all"]);
        assert!(job.dependencies.is_empty());
        assert_eq!(job.state, JobState::Waiting);
    }

    #[tokio::test]
    async fn test_track_and_untrack() {
        let mock = MockTransport::new();
        let mut job = running_job(&mock);

        mock.push_reply(Reply::Int(1));
        assert!(job.track().await.unwrap());
        assert!(job.tracked);
        assert_eq!(mock.last_call(), vec!["track", "track", "jid-9"]);

        mock.push_reply(Reply::Int(1));
        assert!(job.untrack().await.unwrap());
        assert!(!job.tracked);
        assert_eq!(mock.last_call(), vec!["track", "untrack", "jid-9"]);
    }
}
