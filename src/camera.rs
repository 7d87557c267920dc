//! CameraZoomSearch / MemoryDrilldown (spec §4.6, component C7): turns raw
//! similarity hits into a bounded, attributed, pivot-able text view, and
//! resolves a single handle back into full-resolution content.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::drilldown::{DrilldownContext, DrilldownRegistry};
use crate::error::Result;
use crate::models::{CodeDefinition, CodebaseFile, DrilldownType, Memory, Role};
use crate::provider::{CompressionCodec, CompressionLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ZoomLevel {
    UltraWide,
    Wide,
    Normal,
    Close,
    Macro,
}

impl ZoomLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ZoomLevel::UltraWide => "ultra-wide",
            ZoomLevel::Wide => "wide",
            ZoomLevel::Normal => "normal",
            ZoomLevel::Close => "close",
            ZoomLevel::Macro => "macro",
        }
    }

    fn preset(self) -> &'static ZoomPreset {
        PRESETS.iter().find(|p| p.level == self).unwrap()
    }

    pub fn threshold(self) -> f64 {
        self.preset().threshold
    }

    pub fn limit(self) -> usize {
        self.preset().limit
    }

    pub fn content_preview_chars(self) -> usize {
        self.preset().content_preview_chars
    }

    pub fn include_context(self) -> bool {
        self.preset().include_context
    }

    pub fn compression(self) -> CompressionLevel {
        self.preset().compression
    }
}

struct ZoomPreset {
    level: ZoomLevel,
    threshold: f64,
    limit: usize,
    content_preview_chars: usize,
    include_context: bool,
    compression: CompressionLevel,
}

const ORDERED_LEVELS: [ZoomLevel; 5] = [
    ZoomLevel::UltraWide,
    ZoomLevel::Wide,
    ZoomLevel::Normal,
    ZoomLevel::Close,
    ZoomLevel::Macro,
];

static PRESETS: [ZoomPreset; 5] = [
    ZoomPreset {
        level: ZoomLevel::UltraWide,
        threshold: 0.15,
        limit: 50,
        content_preview_chars: 200,
        include_context: false,
        compression: CompressionLevel::Full,
    },
    ZoomPreset {
        level: ZoomLevel::Wide,
        threshold: 0.25,
        limit: 25,
        content_preview_chars: 400,
        include_context: false,
        compression: CompressionLevel::Full,
    },
    ZoomPreset {
        level: ZoomLevel::Normal,
        threshold: 0.40,
        limit: 15,
        content_preview_chars: 600,
        include_context: true,
        compression: CompressionLevel::Light,
    },
    ZoomPreset {
        level: ZoomLevel::Close,
        threshold: 0.60,
        limit: 10,
        content_preview_chars: 800,
        include_context: true,
        compression: CompressionLevel::Light,
    },
    ZoomPreset {
        level: ZoomLevel::Macro,
        threshold: 0.80,
        limit: 5,
        content_preview_chars: 1500,
        include_context: true,
        compression: CompressionLevel::None,
    },
];

/// Widest level whose threshold is at or below `t` (spec §4.6 brackets:
/// 0.20, 0.35, 0.55, 0.75).
pub fn threshold_to_zoom_level(t: f64) -> ZoomLevel {
    if t < 0.20 {
        ZoomLevel::UltraWide
    } else if t < 0.35 {
        ZoomLevel::Wide
    } else if t < 0.55 {
        ZoomLevel::Normal
    } else if t < 0.75 {
        ZoomLevel::Close
    } else {
        ZoomLevel::Macro
    }
}

/// Walks one step along the ordered level list; `None` at either end.
pub fn get_next_zoom(current: ZoomLevel, direction: &str) -> Option<ZoomLevel> {
    let idx = ORDERED_LEVELS.iter().position(|&l| l == current)?;
    match direction {
        "in" => ORDERED_LEVELS.get(idx + 1).copied(),
        "out" => idx.checked_sub(1).and_then(|i| ORDERED_LEVELS.get(i).copied()),
        _ => None,
    }
}

/// A raw candidate before Camera Roll formatting.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: Uuid,
    pub content: String,
    pub similarity: f64,
    pub created_at: DateTime<Utc>,
    pub metadata: Value,
    pub tags: Vec<String>,
    pub paired_response: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CameraRollItem {
    pub index: usize,
    pub handle: i64,
    /// Similarity rounded to two decimals (spec §4.6 "Item construction").
    pub similarity: f64,
    /// `created_at` reduced to `YYYY-MM-DD` (spec §4.6 "Item construction").
    pub date: String,
    pub role: Option<Role>,
    pub content: String,
    pub paired_response: Option<String>,
}

impl CameraRollItem {
    /// Whole-percent form of `similarity`, for the `PP%` text rendering.
    fn similarity_pct(&self) -> i64 {
        (self.similarity * 100.0).round() as i64
    }
}

fn round_to_two_decimals(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Truncates to `max_chars` respecting line boundaries, with the spec's
/// trailer noting how much was cut.
fn truncate_preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let mut cut = max_chars;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = &content[..cut];
    if let Some(last_newline) = truncated.rfind('\n') {
        if last_newline > max_chars / 2 {
            truncated = &truncated[..last_newline];
        }
    }
    let remaining = content.len() - truncated.len();
    format!(
        "{truncated}... [{remaining} more chars — use zoom:100 for full content]"
    )
}

/// Registers `hit` in the drilldown registry and shapes it into a rendered
/// item (spec §4.6 "Item construction").
pub async fn build_item(
    index: usize,
    hit: &SearchHit,
    zoom: ZoomLevel,
    search_query: &str,
    drilldown: &DrilldownRegistry,
    codec: &dyn CompressionCodec,
) -> CameraRollItem {
    let handle = drilldown
        .register(
            hit.id.to_string(),
            DrilldownType::Memory,
            DrilldownContext {
                parent_id: None,
                search_query: Some(search_query.to_string()),
                zoom_level: Some(zoom.as_str().to_string()),
            },
        )
        .await;

    let role = Role::from_metadata_and_tags(&hit.metadata, &hit.tags);
    let preview = truncate_preview(&hit.content, zoom.content_preview_chars());
    let content = codec.compress(&preview, zoom.compression());

    CameraRollItem {
        index,
        handle,
        similarity: round_to_two_decimals(hit.similarity),
        date: hit.created_at.format("%Y-%m-%d").to_string(),
        role,
        content,
        paired_response: hit.paired_response.clone(),
    }
}

/// Renders the stable human-readable Camera Roll view (spec §4.6).
pub fn render_camera_roll(query: &str, zoom: ZoomLevel, items: &[CameraRollItem], total: usize) -> String {
    let mut out = String::new();
    out.push_str("[CAMERA-ROLL]\n");
    out.push_str(&format!("Query: \"{query}\"\n"));
    out.push_str(&format!("Zoom: {} | Found: {}/{}\n\n", zoom.as_str(), items.len(), total));

    for item in items {
        let role_tag = item
            .role
            .map(|r| format!(" [{}]", r.as_tag().trim_start_matches("role:")))
            .unwrap_or_default();
        out.push_str(&format!(
            "[{}] {}% #{}{} {}\n",
            item.index, item.similarity_pct(), item.handle, role_tag, item.content
        ));
        if let Some(response) = &item.paired_response {
            out.push_str(&format!("    [CR] {response}\n"));
        }
    }

    out.push('\n');
    out.push_str("drill_down(ID) for full content | get_memory_by_id(ID) for quick view\n");
    out.push_str("[/CAMERA-ROLL]\n");
    out
}

/// Splits `"filePath"` or `"filePath:defName"`, disambiguating Windows
/// drive letters by checking whether the prefix before the last colon
/// contains a `/` (spec §4.6).
pub fn parse_code_id(id: &str) -> (String, Option<String>) {
    match id.rfind(':') {
        Some(idx) if id[..idx].contains('/') => (id[..idx].to_string(), Some(id[idx + 1..].to_string())),
        _ => (id.to_string(), None),
    }
}

/// Content extent for a given numeric zoom (0-100), per the staircase in
/// spec §4.6. `None` means unlimited (zoom 100).
fn code_extent_chars(zoom: u8) -> Option<usize> {
    match zoom {
        0..=10 => Some(200),
        11..=30 => Some(500),
        31..=50 => Some(1500),
        51..=70 => Some(3000),
        71..=90 => Some(5000),
        _ => None,
    }
}

fn signature_only(zoom: u8) -> bool {
    zoom <= 10
}

#[derive(Debug, Clone)]
pub struct CodeDrilldownResult {
    pub file_path: String,
    pub definition_name: Option<String>,
    pub content: String,
    pub child_drilldown_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct MemoryDrilldownResult {
    pub memory: Memory,
    pub paired_message: Option<Memory>,
    pub conversation_before: Vec<Memory>,
    pub conversation_after: Vec<Memory>,
    pub related_memories: Vec<Memory>,
    pub code_refs: Vec<(String, String)>,
    pub child_drilldown_ids: Vec<i64>,
}

pub enum DrilldownResult {
    Code(CodeDrilldownResult),
    Memory(Box<MemoryDrilldownResult>),
}

/// Resolves one handle, dispatching to the code or memory branch (spec
/// §4.6). Returns `None` for an unknown handle. DB errors on mandatory
/// fetches propagate; errors on optional enrichment degrade gracefully.
pub struct MemoryDrilldown {
    pool: PgPool,
    registry: Arc<DrilldownRegistry>,
}

impl MemoryDrilldown {
    pub fn new(pool: PgPool, registry: Arc<DrilldownRegistry>) -> Self {
        Self { pool, registry }
    }

    pub async fn drill_down(&self, handle: &str, zoom: u8) -> Result<Option<DrilldownResult>> {
        let Some(entry) = self.registry.resolve(handle).await else {
            return Ok(None);
        };

        match entry.kind {
            DrilldownType::Code => self.drill_down_code(&entry.key, zoom).await.map(Some),
            DrilldownType::Memory | DrilldownType::Context => {
                let Ok(memory_id) = entry.key.parse::<Uuid>() else {
                    return Ok(None);
                };
                self.drill_down_memory(memory_id, zoom).await
            }
        }
    }

    async fn drill_down_code(&self, memory_key: &str, zoom: u8) -> Result<DrilldownResult> {
        let (file_path, def_name) = parse_code_id(memory_key);

        type CodeDefRow = (String, String, String, String, i32, i32, String, Option<String>, Option<String>, bool);
        type FileRow = (String, String, String, String, i32);

        let content = if let Some(name) = &def_name {
            let def: Option<CodeDefRow> = sqlx::query_as(
                r#"SELECT file_path, name, definition_type, language, start_line, end_line,
                          content, signature, docstring, is_exported
                   FROM code_definitions WHERE file_path = $1 AND name = $2"#,
            )
            .bind(&file_path)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

            let def: Option<CodeDefinition> = def.map(
                |(file_path, name, definition_type, language, start_line, end_line, content, signature, docstring, is_exported)| {
                    CodeDefinition {
                        file_path,
                        name,
                        definition_type,
                        language,
                        start_line,
                        end_line,
                        content,
                        signature,
                        docstring,
                        is_exported,
                    }
                },
            );

            match def {
                Some(d) if signature_only(zoom) => d.signature.unwrap_or(d.content),
                Some(d) => extent_truncate(&d.content, zoom),
                None => String::new(),
            }
        } else {
            let file: Option<FileRow> = sqlx::query_as(
                r#"SELECT file_path, file_name, language_id, content, line_count
                   FROM codebase_files WHERE file_path = $1"#,
            )
            .bind(&file_path)
            .fetch_optional(&self.pool)
            .await?;

            let file: Option<CodebaseFile> = file.map(|(file_path, file_name, language_id, content, line_count)| CodebaseFile {
                file_path,
                file_name,
                language_id,
                content,
                line_count,
            });

            file.map(|f| extent_truncate(&f.content, zoom)).unwrap_or_default()
        };

        Ok(DrilldownResult::Code(CodeDrilldownResult {
            file_path,
            definition_name: def_name,
            content,
            child_drilldown_ids: Vec::new(),
        }))
    }

    async fn drill_down_memory(&self, memory_id: Uuid, include_context_zoom: u8) -> Result<Option<DrilldownResult>> {
        let memory: Option<MemoryRow> = sqlx::query_as(
            "SELECT id, content, tags, metadata, embedding, created_at FROM memories WHERE id = $1",
        )
        .bind(memory_id)
        .fetch_optional(&self.pool)
        .await?;
        let memory = memory.map(row_to_memory);

        let Some(memory) = memory else {
            return Ok(None);
        };

        let include_context = include_context_zoom > 10;
        let session_id = memory.session_id().map(|s| s.to_string());
        let role = memory.role();

        let paired_message = match (&session_id, role) {
            (Some(sid), Some(r)) => self.find_paired_message(sid, &memory, r).await.unwrap_or_else(|e| {
                warn!("paired message lookup failed: {e}");
                None
            }),
            _ => None,
        };

        let (before, after) = if include_context {
            match &session_id {
                Some(sid) => self.conversation_context(sid, &memory).await.unwrap_or_else(|e| {
                    warn!("conversation context lookup failed: {e}");
                    (Vec::new(), Vec::new())
                }),
                None => (Vec::new(), Vec::new()),
            }
        } else {
            (Vec::new(), Vec::new())
        };

        let related = self
            .related_memories(&memory, 5)
            .await
            .unwrap_or_else(|e| {
                warn!("related memories lookup failed: {e}");
                Vec::new()
            });

        let code_refs = self
            .code_refs(memory.id, 5)
            .await
            .unwrap_or_else(|e| {
                warn!("code ref lookup failed: {e}");
                Vec::new()
            });

        let mut child_ids = Vec::new();
        if let Some(pm) = &paired_message {
            child_ids.push(
                self.registry
                    .register(pm.id.to_string(), DrilldownType::Memory, DrilldownContext::default())
                    .await,
            );
        }
        for m in before.iter().chain(after.iter()).chain(related.iter()) {
            child_ids.push(
                self.registry
                    .register(m.id.to_string(), DrilldownType::Memory, DrilldownContext::default())
                    .await,
            );
        }

        Ok(Some(DrilldownResult::Memory(Box::new(MemoryDrilldownResult {
            memory,
            paired_message,
            conversation_before: before,
            conversation_after: after,
            related_memories: related,
            code_refs,
            child_drilldown_ids: child_ids,
        }))))
    }

    /// Most recent memory in the same session with the opposite role, on
    /// the correct side of `pivot`'s timestamp (user precedes assistant).
    /// Tool-call records are excluded by a content heuristic.
    async fn find_paired_message(&self, session_id: &str, pivot: &Memory, role: Role) -> Result<Option<Memory>> {
        let opposite = role.opposite().as_tag();
        let pivot_ts = pivot.ordering_timestamp();

        let candidates: Vec<MemoryRow> = sqlx::query_as(
            r#"SELECT id, content, tags, metadata, embedding, created_at
               FROM memories
               WHERE metadata->>'sessionId' = $1
                 AND id != $2
               ORDER BY created_at DESC
               LIMIT 50"#,
        )
        .bind(session_id)
        .bind(pivot.id)
        .fetch_all(&self.pool)
        .await?;

        let found = candidates
            .into_iter()
            .map(row_to_memory)
            .filter(|m| m.role().map(|r| r.as_tag() == opposite).unwrap_or(false))
            .filter(|m| !looks_like_tool_call(&m.content))
            .find(|m| {
                let ts = m.ordering_timestamp();
                match role {
                    Role::User => ts > pivot_ts,
                    Role::Assistant => ts < pivot_ts,
                }
            });

        Ok(found)
    }

    /// Up to 10 other memories in the session, partitioned into the last 3
    /// before and first 3 after the pivot's `created_at`.
    async fn conversation_context(&self, session_id: &str, pivot: &Memory) -> Result<(Vec<Memory>, Vec<Memory>)> {
        let rows: Vec<MemoryRow> = sqlx::query_as(
            r#"SELECT id, content, tags, metadata, embedding, created_at
               FROM memories
               WHERE metadata->>'sessionId' = $1 AND id != $2
               ORDER BY created_at ASC
               LIMIT 10"#,
        )
        .bind(session_id)
        .bind(pivot.id)
        .fetch_all(&self.pool)
        .await?;
        let rows: Vec<Memory> = rows.into_iter().map(row_to_memory).collect();

        let mut before: Vec<Memory> = rows.iter().filter(|m| m.created_at < pivot.created_at).cloned().collect();
        let mut after: Vec<Memory> = rows.into_iter().filter(|m| m.created_at >= pivot.created_at).collect();

        if before.len() > 3 {
            before = before.split_off(before.len() - 3);
        }
        after.truncate(3);
        Ok((before, after))
    }

    async fn related_memories(&self, pivot: &Memory, limit: i64) -> Result<Vec<Memory>> {
        let Some(embedding) = &pivot.embedding else {
            return Ok(Vec::new());
        };
        let vector = pgvector::Vector::from(embedding.clone());

        let rows: Vec<MemoryRow> = sqlx::query_as(
            r#"SELECT id, content, tags, metadata, embedding, created_at
               FROM memories
               WHERE id != $1
               ORDER BY embedding <=> $2
               LIMIT $3"#,
        )
        .bind(pivot.id)
        .bind(vector)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_memory).collect())
    }

    /// Absent `codebase_pointers`/`codebase_files` tables are tolerated
    /// silently (spec §4.6).
    async fn code_refs(&self, memory_id: Uuid, limit: i64) -> Result<Vec<(String, String)>> {
        let rows: std::result::Result<Vec<(String, Option<String>)>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT cp.file_path, cf.file_name
            FROM codebase_pointers cp
            LEFT JOIN codebase_files cf ON cf.file_path = cp.file_path
            WHERE cp.memory_id = $1
            LIMIT $2
            "#,
        )
        .bind(memory_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => Ok(rows
                .into_iter()
                .map(|(path, name)| (path.clone(), name.unwrap_or(path)))
                .collect()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42P01") => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

type MemoryRow = (Uuid, String, Vec<String>, Value, Option<pgvector::Vector>, DateTime<Utc>);

fn row_to_memory(row: MemoryRow) -> Memory {
    let (id, content, tags, metadata, embedding, created_at) = row;
    Memory {
        id,
        content,
        tags,
        metadata,
        embedding: embedding.map(|v| v.to_vec()),
        created_at,
    }
}

fn extent_truncate(content: &str, zoom: u8) -> String {
    match code_extent_chars(zoom) {
        None => content.to_string(),
        Some(max) => truncate_preview(content, max),
    }
}

fn looks_like_tool_call(content: &str) -> bool {
    let trimmed = content.trim_start();
    trimmed.starts_with("<tool_call") || trimmed.starts_with("{\"tool") || trimmed.starts_with("[TOOL")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_brackets_match_spec_table() {
        assert_eq!(threshold_to_zoom_level(0.0), ZoomLevel::UltraWide);
        assert_eq!(threshold_to_zoom_level(0.19), ZoomLevel::UltraWide);
        assert_eq!(threshold_to_zoom_level(0.20), ZoomLevel::Wide);
        assert_eq!(threshold_to_zoom_level(0.34), ZoomLevel::Wide);
        assert_eq!(threshold_to_zoom_level(0.35), ZoomLevel::Normal);
        assert_eq!(threshold_to_zoom_level(0.54), ZoomLevel::Normal);
        assert_eq!(threshold_to_zoom_level(0.55), ZoomLevel::Close);
        assert_eq!(threshold_to_zoom_level(0.74), ZoomLevel::Close);
        assert_eq!(threshold_to_zoom_level(0.75), ZoomLevel::Macro);
        assert_eq!(threshold_to_zoom_level(1.0), ZoomLevel::Macro);
    }

    #[test]
    fn get_next_zoom_walks_the_chain_once() {
        assert_eq!(get_next_zoom(ZoomLevel::UltraWide, "out"), None);
        assert_eq!(get_next_zoom(ZoomLevel::UltraWide, "in"), Some(ZoomLevel::Wide));
        assert_eq!(get_next_zoom(ZoomLevel::Macro, "in"), None);
        assert_eq!(get_next_zoom(ZoomLevel::Macro, "out"), Some(ZoomLevel::Close));
    }

    #[test]
    fn presets_are_monotone() {
        let mut prev_threshold = -1.0;
        let mut prev_limit = usize::MAX;
        for level in ORDERED_LEVELS {
            assert!(level.threshold() > prev_threshold);
            assert!(level.limit() < prev_limit);
            prev_threshold = level.threshold();
            prev_limit = level.limit();
        }
    }

    #[test]
    fn parse_code_id_splits_unix_path_and_def_name() {
        let (path, name) = parse_code_id("/home/user/src/lib.rs:my_fn");
        assert_eq!(path, "/home/user/src/lib.rs");
        assert_eq!(name.as_deref(), Some("my_fn"));
    }

    #[test]
    fn parse_code_id_treats_windows_drive_letter_as_no_def_name() {
        let (path, name) = parse_code_id(r"C:\Users\me\src\lib.rs");
        assert_eq!(path, r"C:\Users\me\src\lib.rs");
        assert_eq!(name, None);
    }

    #[test]
    fn parse_code_id_with_no_colon_has_no_def_name() {
        let (path, name) = parse_code_id("src/lib.rs");
        assert_eq!(path, "src/lib.rs");
        assert_eq!(name, None);
    }

    #[test]
    fn truncate_preview_adds_trailer_when_over_limit() {
        let long = "a".repeat(500);
        let truncated = truncate_preview(&long, 100);
        assert!(truncated.contains("more chars"));
    }

    #[test]
    fn truncate_preview_is_identity_under_limit() {
        assert_eq!(truncate_preview("short", 100), "short");
    }

    #[test]
    fn round_to_two_decimals_matches_spec_precision() {
        assert_eq!(round_to_two_decimals(0.876543), 0.88);
        assert_eq!(round_to_two_decimals(0.5), 0.5);
    }

    #[test]
    fn render_camera_roll_matches_stable_shape() {
        let items = vec![CameraRollItem {
            index: 1,
            handle: 7,
            similarity: 0.92,
            date: "2026-07-26".to_string(),
            role: Some(Role::User),
            content: "hello".to_string(),
            paired_response: Some("hi there".to_string()),
        }];
        let rendered = render_camera_roll("hello", ZoomLevel::Wide, &items, 3);
        assert!(rendered.starts_with("[CAMERA-ROLL]\n"));
        assert!(rendered.contains("Zoom: wide | Found: 1/3"));
        assert!(rendered.contains("[1] 92% #7 [user] hello"));
        assert!(rendered.contains("[CR] hi there"));
        assert!(rendered.trim_end().ends_with("[/CAMERA-ROLL]"));
    }
}
