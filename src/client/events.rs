//! Job lifecycle events published by the script library.
//!
//! Each event kind is published on its own `ql:<kind>` channel with the
//! affected jid as the message body. Subscriptions use a dedicated
//! connection, separate from the one used for script invocations.

use std::fmt;
use std::str::FromStr;

use futures::future;
use futures::stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::{QlessError, Result, TransportError};

const CHANNEL_PREFIX: &str = "ql:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Canceled,
    Completed,
    Failed,
    Popped,
    Stalled,
    Put,
    Track,
    Untrack,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Canceled,
        EventKind::Completed,
        EventKind::Failed,
        EventKind::Popped,
        EventKind::Stalled,
        EventKind::Put,
        EventKind::Track,
        EventKind::Untrack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Canceled => "canceled",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Popped => "popped",
            EventKind::Stalled => "stalled",
            EventKind::Put => "put",
            EventKind::Track => "track",
            EventKind::Untrack => "untrack",
        }
    }

    pub fn channel(&self) -> String {
        format!("{}{}", CHANNEL_PREFIX, self.as_str())
    }

    /// Maps a `ql:<kind>` channel back to its kind.
    pub fn from_channel(channel: &str) -> Option<Self> {
        channel
            .strip_prefix(CHANNEL_PREFIX)
            .and_then(|kind| kind.parse().ok())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = QlessError;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| QlessError::InvalidArgument(format!("unknown event '{}'", s)))
    }
}

/// A single published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub jid: String,
}

/// Event subscriptions bound to one Redis deployment.
#[derive(Debug, Clone)]
pub struct Events {
    redis: redis::Client,
}

impl Events {
    pub fn new(redis_url: &str) -> Result<Self> {
        let redis = redis::Client::open(redis_url).map_err(TransportError::from)?;
        Ok(Self { redis })
    }

    /// Subscribes to `kinds` and streams events as they are published.
    ///
    /// The stream ends when the subscription connection closes.
    pub async fn listen(&self, kinds: &[EventKind]) -> Result<impl Stream<Item = Event>> {
        if kinds.is_empty() {
            return Err(QlessError::InvalidArgument(
                "at least one event kind is required".to_string(),
            ));
        }

        let connection = self
            .redis
            .get_async_connection()
            .await
            .map_err(TransportError::from)?;
        let mut pubsub = connection.into_pubsub();
        for kind in kinds {
            pubsub
                .subscribe(kind.channel())
                .await
                .map_err(TransportError::from)?;
        }
        debug!(channels = kinds.len(), "Subscribed to events");

        Ok(pubsub
            .into_on_message()
            .filter_map(|msg| future::ready(decode_event(&msg))))
    }
}

fn decode_event(msg: &redis::Msg) -> Option<Event> {
    let kind = EventKind::from_channel(msg.get_channel_name())?;
    match msg.get_payload::<String>() {
        Ok(jid) => Some(Event { kind, jid }),
        Err(e) => {
            warn!(channel = msg.get_channel_name(), error = %e, "Dropping undecodable event");
            None
        }
    }
}
