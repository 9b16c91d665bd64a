//! Incident records and the codes that name them.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Dense integer code for a named incident. Zero is the invalid sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IncidentCode(u32);

impl IncidentCode {
    pub const INVALID: IncidentCode = IncidentCode(0);

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_sentinel(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for IncidentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that happened, or will happen at `timestamp`.
///
/// Serves both as the record handed to responders when an incident fires and
/// as the bookkeeping part of a scheduled task. The timestamp is fixed at
/// construction; use [`Incident::retimed`] to copy it onto a new time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    timestamp: i64,
    /// Book-keeping name, used for ordering and introspection.
    pub identifier: Option<String>,
    /// What caused this. Often the subject of the event.
    pub source: serde_json::Value,
    /// Additional data about what is happening.
    pub detail: serde_json::Value,
}

impl Incident {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            identifier: None,
            source: serde_json::Value::Null,
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_source(mut self, source: serde_json::Value) -> Self {
        self.source = source;
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Copy of this incident at a different time.
    pub fn retimed(&self, timestamp: i64) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    /// Schedule ordering: timestamp first, then identifier (ordinal), with
    /// unnamed incidents after named ones.
    pub fn schedule_cmp(&self, other: &Incident) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| match (&self.identifier, &other.identifier) {
                (Some(a), Some(b)) => a.as_str().cmp(b.as_str()),
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (None, None) => Ordering::Equal,
            })
    }
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.identifier.as_deref().unwrap_or_default(),
            self.timestamp
        )
    }
}

/// Name and fire count for one incident code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentKind {
    pub id: Option<String>,
    pub code: IncidentCode,
    pub count: u64,
}

impl IncidentKind {
    pub(crate) fn new(id: Option<String>, code: IncidentCode) -> Self {
        Self { id, code, count: 0 }
    }
}
