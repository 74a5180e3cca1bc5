//! Invalidation event wire format.
//!
//! Events arrive as JSON from any transport or the webhook:
//!
//! ```json
//! { "event": "on_doc_update", "affectedContent": [{ "root": "home", "path": "/about" }] }
//! ```
//!
//! Field names are accepted in camelCase or PascalCase.

use serde::Deserialize;
use thiserror::Error;

/// Kind of change reported by the CMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum EventKind {
    #[serde(rename = "on_doc_create")]
    DocCreate,
    #[serde(rename = "on_doc_change")]
    DocChange,
    #[serde(rename = "on_doc_update")]
    DocUpdate,
    #[serde(rename = "on_doc_delete")]
    DocDelete,
    #[serde(rename = "on_users_change")]
    UsersChange,
    #[serde(rename = "on_xmlschema_change")]
    XmlSchemaChange,
    #[serde(rename = "on_destination_enable")]
    DestinationEnable,
    #[serde(rename = "on_destination_disable")]
    DestinationDisable,
    #[serde(rename = "on_media_create")]
    MediaCreate,
    #[serde(rename = "on_media_delete")]
    MediaDelete,
    /// Any event name this build does not know about.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::DocCreate => "on_doc_create",
            EventKind::DocChange => "on_doc_change",
            EventKind::DocUpdate => "on_doc_update",
            EventKind::DocDelete => "on_doc_delete",
            EventKind::UsersChange => "on_users_change",
            EventKind::XmlSchemaChange => "on_xmlschema_change",
            EventKind::DestinationEnable => "on_destination_enable",
            EventKind::DestinationDisable => "on_destination_disable",
            EventKind::MediaCreate => "on_media_create",
            EventKind::MediaDelete => "on_media_delete",
            EventKind::Unknown => "unknown",
        }
    }

    pub fn is_media(self) -> bool {
        matches!(self, EventKind::MediaCreate | EventKind::MediaDelete)
    }
}

/// One `(root, path)` pair named by an event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AffectedContent {
    #[serde(default, alias = "Root")]
    pub root: String,
    #[serde(default, alias = "Path")]
    pub path: String,
}

/// A decoded invalidation event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InvalidationEvent {
    #[serde(alias = "Event")]
    pub event: EventKind,
    /// `None` when the event carries no detail about what changed.
    #[serde(default, rename = "affectedContent", alias = "AffectedContent")]
    pub affected_content: Option<Vec<AffectedContent>>,
}

impl InvalidationEvent {
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            affected_content: None,
        }
    }

    pub fn with_affected(
        event: EventKind,
        affected: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            event,
            affected_content: Some(
                affected
                    .into_iter()
                    .map(|(root, path)| AffectedContent { root, path })
                    .collect(),
            ),
        }
    }

    /// Decode an event from a raw transport payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }
        serde_json::from_slice(payload).map_err(DecodeError::Json)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty event payload")]
    Empty,
    #[error("malformed event payload: {0}")]
    Json(#[source] serde_json::Error),
}
