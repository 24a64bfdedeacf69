//! Wire types for the paginated device registry and the immutable [`Record`]
//! handed to registration workers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of device registrations as returned by the source registry.
///
/// Field names follow the provider's wire format; the generic names from the
/// list endpoint contract are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(
        rename = "device_tokens_count",
        alias = "total_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_count: Option<u64>,
    #[serde(
        rename = "active_device_tokens_count",
        alias = "active_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub active_count: Option<u64>,
    #[serde(rename = "device_tokens", alias = "items")]
    pub items: Vec<PageItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
}

impl Page {
    /// Authoritative totals carried by this page, if it reports both counts.
    pub fn totals(&self) -> Option<Totals> {
        match (self.total_count, self.active_count) {
            (Some(total), Some(active)) => Some(Totals { total, active }),
            _ => None,
        }
    }

    /// Continuation cursor for the following page. Blank tokens end the stream.
    pub fn next_cursor(&self) -> Option<Cursor> {
        self.next_page
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Cursor::Next(token.to_owned()))
    }

    /// Converts the page items into records numbered from `first_sequence`.
    pub fn to_records(&self, first_sequence: u64) -> Vec<Record> {
        self.items
            .iter()
            .enumerate()
            .map(|(offset, item)| Record::from_item(first_sequence + offset as u64, item))
            .collect()
    }
}

/// Raw registry entry. Only `device_token` and `active` matter to the pipeline;
/// everything else travels along as opaque metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageItem {
    #[serde(alias = "id", default)]
    pub device_token: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub alias: Value,
    #[serde(default)]
    pub tags: Vec<Value>,
}

/// Totals reported by the first page of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub total: u64,
    pub active: u64,
}

/// Position in the logical record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// First request, optionally bounded by a page size and a starting record id.
    Start {
        limit: Option<usize>,
        start: Option<String>,
    },
    /// Continuation token (usually a full URL) returned by the previous page.
    Next(String),
}

impl Cursor {
    pub fn start(limit: Option<usize>, start: Option<String>) -> Self {
        Cursor::Start { limit, start }
    }
}

/// A device registration fetched from the source registry.
///
/// `sequence` is the zero-based position of the record in the stream, which
/// keys the record even when the registry returned it without an id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub sequence: u64,
    #[serde(rename = "device_token")]
    pub id: String,
    pub active: bool,
    #[serde(rename = "created")]
    pub created_at: String,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordMetadata {
    pub alias: Value,
    pub tags: Vec<Value>,
}

impl Record {
    pub fn new(sequence: u64, id: impl Into<String>, active: bool) -> Self {
        Self {
            sequence,
            id: id.into(),
            active,
            created_at: String::new(),
            metadata: RecordMetadata::default(),
        }
    }

    fn from_item(sequence: u64, item: &PageItem) -> Self {
        Self {
            sequence,
            id: item.device_token.clone().unwrap_or_default(),
            active: item.active,
            created_at: item.created.clone(),
            metadata: RecordMetadata {
                alias: item.alias.clone(),
                tags: item.tags.clone(),
            },
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }
}
