use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::truncate_string;

/// Longest entity label shown in a notice
const MAX_NOTICE_LABEL_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationKind {
    /// A coach activated a routine for the student.
    #[serde(rename = "entity-activated")]
    EntityActivated,
    /// A coach edited the student's active routine.
    #[serde(rename = "entity-updated")]
    EntityUpdated,
    /// Server-side request to drop cached data, with no user-facing notice.
    #[serde(rename = "cache-invalidate")]
    CacheInvalidate,
}

impl InvalidationKind {
    pub fn event_name(&self) -> &'static str {
        match self {
            InvalidationKind::EntityActivated => "entity-activated",
            InvalidationKind::EntityUpdated => "entity-updated",
            InvalidationKind::CacheInvalidate => "cache-invalidate",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "entity-activated" => Some(InvalidationKind::EntityActivated),
            "entity-updated" => Some(InvalidationKind::EntityUpdated),
            "cache-invalidate" => Some(InvalidationKind::CacheInvalidate),
            _ => None,
        }
    }

    pub fn notifies_user(&self) -> bool {
        !matches!(self, InvalidationKind::CacheInvalidate)
    }
}

/// A server-pushed event. Consumed once, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    pub kind: InvalidationKind,
    #[serde(default)]
    pub entity_id: Option<i64>,
    #[serde(default)]
    pub entity_label: Option<String>,
    #[serde(default)]
    pub actor_label: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Utc::now")]
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPayload {
    #[serde(default)]
    entity_id: Option<i64>,
    #[serde(default)]
    entity_label: Option<String>,
    #[serde(default)]
    actor_label: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    emitted_at: Option<DateTime<Utc>>,
}

/// `{"event": "<name>", "data": {...}}` as delivered on the wire.
#[derive(Debug, Deserialize)]
struct PushFrame {
    event: String,
    #[serde(default)]
    data: Option<EventPayload>,
}

impl InvalidationEvent {
    pub fn new(kind: InvalidationKind) -> Self {
        Self {
            kind,
            entity_id: None,
            entity_label: None,
            actor_label: None,
            message: None,
            emitted_at: Utc::now(),
        }
    }

    /// Decode one text frame. Events this client does not handle yield `None`.
    pub fn from_frame(text: &str) -> Result<Option<Self>> {
        let frame: PushFrame = serde_json::from_str(text).context("Malformed push frame")?;
        let Some(kind) = InvalidationKind::from_event_name(&frame.event) else {
            debug!(event = %frame.event, "Ignoring unhandled push event");
            return Ok(None);
        };
        let payload = frame.data.unwrap_or_default();
        Ok(Some(Self {
            kind,
            entity_id: payload.entity_id,
            entity_label: payload.entity_label,
            actor_label: payload.actor_label,
            message: payload.message,
            emitted_at: payload.emitted_at.unwrap_or_else(Utc::now),
        }))
    }

    /// The transient notice shown for this event, if its kind has one.
    pub fn notice(&self) -> Option<Notice> {
        if !self.kind.notifies_user() {
            return None;
        }
        let label = truncate_string(
            self.entity_label.as_deref().unwrap_or("your routine"),
            MAX_NOTICE_LABEL_LEN,
        );
        let title = match self.kind {
            InvalidationKind::EntityActivated => "New routine assigned",
            _ => "Routine updated",
        };
        let body = match (&self.message, &self.actor_label) {
            (Some(message), _) if !message.is_empty() => message.clone(),
            (_, Some(actor)) => match self.kind {
                InvalidationKind::EntityActivated => format!("{} activated {}", actor, label),
                _ => format!("{} updated {}", actor, label),
            },
            _ => label.clone(),
        };
        Some(Notice {
            kind: self.kind,
            title: title.to_string(),
            body,
            entity_id: self.entity_id,
            entity_label: label,
        })
    }
}

/// Transient user-facing message raised by a push event.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: InvalidationKind,
    pub title: String,
    pub body: String,
    pub entity_id: Option<i64>,
    pub entity_label: String,
}
