//! Data model types (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row in the `projects` registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub path: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role of a conversational turn, carried in `metadata.role` or the
/// `role:user`/`role:assistant` tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn opposite(self) -> Role {
        match self {
            Role::User => Role::Assistant,
            Role::Assistant => Role::User,
        }
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            Role::User => "role:user",
            Role::Assistant => "role:assistant",
        }
    }

    /// Extracts a role from explicit `metadata.role`, falling back to the
    /// `role:*` tag family (spec §4.6 item construction).
    pub fn from_metadata_and_tags(metadata: &serde_json::Value, tags: &[String]) -> Option<Role> {
        if let Some(r) = metadata.get("role").and_then(|v| v.as_str()) {
            return Self::from_str(r);
        }
        tags.iter().find_map(|t| {
            t.strip_prefix("role:").and_then(Self::from_str)
        })
    }

    fn from_str(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A `memories` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub content: String,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Memory {
    pub fn role(&self) -> Option<Role> {
        Role::from_metadata_and_tags(&self.metadata, &self.tags)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.metadata.get("sessionId").and_then(|v| v.as_str())
    }

    /// `metadata.timestamp` when present, else `created_at` coalesced to
    /// UTC — the tie-breaker spec §9 requires implementers to document.
    pub fn ordering_timestamp(&self) -> DateTime<Utc> {
        self.metadata
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeDefinition {
    pub file_path: String,
    pub name: String,
    pub definition_type: String,
    pub language: String,
    pub start_line: i32,
    pub end_line: i32,
    pub content: String,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub is_exported: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebaseFile {
    pub file_path: String,
    pub file_name: String,
    pub language_id: String,
    pub content: String,
    pub line_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebasePointer {
    pub memory_id: Uuid,
    pub file_path: String,
    pub line_start: i32,
    pub line_end: i32,
    pub function_name: Option<String>,
}

/// Status of an `embedding_queue` row (spec §3 state machine:
/// `pending -> processing -> {completed, failed}`; terminal rows are
/// immutable).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingQueueEntry {
    pub id: i64,
    pub project_id: String,
    pub text: String,
    pub priority: i32,
    pub status: QueueStatus,
    pub embedding: Option<Vec<f32>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Kind of key a drilldown handle resolves to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DrilldownType {
    Memory,
    Code,
    Context,
}

/// An index type on a vector column, as observed in the catalog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorIndexType {
    Ivfflat,
    Hnsw,
    Btree,
    Other,
}

/// A `(table, column)` entry in the derived vector column registry (spec
/// §3: "Vector Column Registry (derived)").
#[derive(Debug, Clone)]
pub struct VectorColumnInfo {
    pub table: String,
    pub column: String,
    pub dimension: usize,
    pub has_index: bool,
    pub index_type: Option<VectorIndexType>,
}
