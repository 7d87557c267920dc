//! MiniCOTScorer (spec §4.7, component C8): rescores a batch of code/memory
//! candidates with an external reasoning model, with attribution and a
//! similarity-only fallback.

use crate::provider::{CotCandidateSnippet, CotVerdict, MiniCotProvider};

const DEFAULT_VECTOR_WEIGHT: f64 = 0.4;
const SNIPPET_PREVIEW_CHARS: usize = 200;
const SNIPPET_MEMORY_CONTEXT_CHARS: usize = 100;

/// A candidate before rescoring (spec §4.7 inputs).
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    pub id: String,
    pub file_path: Option<String>,
    pub name: Option<String>,
    pub definition_type: Option<String>,
    pub content_preview: String,
    pub line_range: Option<(i32, i32)>,
    pub similarity: f64,
    pub memory_id: Option<String>,
    pub memory_content: Option<String>,
    pub memory_role: Option<String>,
    pub memory_tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    User,
    Assistant,
    UserCode,
    Generated,
    Unknown,
}

impl Attribution {
    fn as_str(self) -> &'static str {
        match self {
            Attribution::User => "user",
            Attribution::Assistant => "assistant",
            Attribution::UserCode => "user-code",
            Attribution::Generated => "generated",
            Attribution::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrillHint {
    GetMemory(String),
    OpenFile(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMethod {
    Hybrid,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub id: String,
    pub score: f64,
    pub similarity: f64,
    pub cot_relevance: Option<f64>,
    pub cot_reasoning: Option<String>,
    pub attribution: Attribution,
    pub drill_hint: DrillHint,
}

#[derive(Debug, Clone)]
pub struct ScoredBatch {
    pub candidates: Vec<ScoredCandidate>,
    pub average_relevance: f64,
    pub method: ScoringMethod,
    pub attribution_breakdown: Vec<(Attribution, usize)>,
}

impl ScoredBatch {
    /// Renders the attribution breakdown as `"user: 3, assistant: 2"`, for
    /// logging alongside `average_relevance`/`method` (spec §4.7 "always
    /// return ... an attribution breakdown").
    pub fn attribution_summary(&self) -> String {
        self.attribution_breakdown
            .iter()
            .map(|(a, count)| format!("{}: {count}", a.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Rescores candidates with the Mini-COT service; falls back to
/// similarity-only scoring on any failure or timeout (spec §4.7).
pub struct MiniCotScorer {
    vector_weight: f64,
}

impl MiniCotScorer {
    pub fn new() -> Self {
        Self {
            vector_weight: DEFAULT_VECTOR_WEIGHT,
        }
    }

    pub fn with_vector_weight(vector_weight: f64) -> Self {
        Self { vector_weight }
    }

    pub async fn score(&self, query: &str, candidates: &[Candidate], provider: &dyn MiniCotProvider) -> ScoredBatch {
        if !provider.is_available().await {
            return self.fallback(candidates);
        }

        let snippets: Vec<CotCandidateSnippet> = candidates.iter().map(build_snippet).collect();
        match provider.score_gallery(query, &snippets).await {
            Ok(verdicts) => self.combine(candidates, &verdicts),
            Err(_) => self.fallback(candidates),
        }
    }

    fn combine(&self, candidates: &[Candidate], verdicts: &[CotVerdict]) -> ScoredBatch {
        let scored: Vec<ScoredCandidate> = candidates
            .iter()
            .map(|c| {
                let verdict = verdicts.iter().find(|v| v.memory_id == c.id);
                let cot_relevance = verdict.map(|v| v.relevance);
                let score = match cot_relevance {
                    Some(rel) => self.vector_weight * c.similarity + (1.0 - self.vector_weight) * rel,
                    None => c.similarity,
                };
                ScoredCandidate {
                    id: c.id.clone(),
                    score,
                    similarity: c.similarity,
                    cot_relevance,
                    cot_reasoning: verdict.map(|v| v.cot.clone()),
                    attribution: attribute(c),
                    drill_hint: drill_hint(c),
                }
            })
            .collect();

        finish(scored, ScoringMethod::Hybrid)
    }

    fn fallback(&self, candidates: &[Candidate]) -> ScoredBatch {
        let scored: Vec<ScoredCandidate> = candidates
            .iter()
            .map(|c| ScoredCandidate {
                id: c.id.clone(),
                score: c.similarity,
                similarity: c.similarity,
                cot_relevance: None,
                cot_reasoning: None,
                attribution: attribute(c),
                drill_hint: drill_hint(c),
            })
            .collect();

        finish(scored, ScoringMethod::Fallback)
    }
}

impl Default for MiniCotScorer {
    fn default() -> Self {
        Self::new()
    }
}

fn finish(candidates: Vec<ScoredCandidate>, method: ScoringMethod) -> ScoredBatch {
    let average_relevance = if candidates.is_empty() {
        0.0
    } else {
        candidates.iter().map(|c| c.score).sum::<f64>() / candidates.len() as f64
    };

    let mut breakdown: Vec<(Attribution, usize)> = Vec::new();
    for c in &candidates {
        match breakdown.iter_mut().find(|(a, _)| *a == c.attribution) {
            Some((_, count)) => *count += 1,
            None => breakdown.push((c.attribution, 1)),
        }
    }

    ScoredBatch {
        candidates,
        average_relevance,
        method,
        attribution_breakdown: breakdown,
    }
}

/// Stable-shape snippet: file, def type+name, line range, preview up to
/// ~200 chars, short memory context up to ~100 chars (spec §4.7).
fn build_snippet(c: &Candidate) -> CotCandidateSnippet {
    let mut keyword_parts = Vec::new();
    if let Some(path) = &c.file_path {
        keyword_parts.push(path.clone());
    }
    if let (Some(kind), Some(name)) = (&c.definition_type, &c.name) {
        keyword_parts.push(format!("{kind} {name}"));
    } else if let Some(name) = &c.name {
        keyword_parts.push(name.clone());
    }
    if let Some((start, end)) = c.line_range {
        keyword_parts.push(format!("L{start}-{end}"));
    }

    let mut snippet = truncate_chars(&c.content_preview, SNIPPET_PREVIEW_CHARS);
    if let Some(memory_content) = &c.memory_content {
        snippet.push_str(" | ");
        snippet.push_str(&truncate_chars(memory_content, SNIPPET_MEMORY_CONTEXT_CHARS));
    }

    CotCandidateSnippet {
        id: c.id.clone(),
        keywords: keyword_parts.join(" "),
        snippet,
        role: c.memory_role.clone(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Priority order: `memoryRole` → `role:*` tag → `user-code`/`generated`
/// tag family → `unknown` (spec §4.7).
fn attribute(c: &Candidate) -> Attribution {
    if let Some(role) = &c.memory_role {
        match role.as_str() {
            "user" => return Attribution::User,
            "assistant" => return Attribution::Assistant,
            _ => {}
        }
    }
    for tag in &c.memory_tags {
        match tag.as_str() {
            "role:user" => return Attribution::User,
            "role:assistant" => return Attribution::Assistant,
            "user-code" => return Attribution::UserCode,
            "generated" => return Attribution::Generated,
            _ => {}
        }
    }
    Attribution::Unknown
}

/// Points at `get_memory` when a memory id exists, else a direct file open
/// (spec §4.7).
fn drill_hint(c: &Candidate) -> DrillHint {
    match (&c.memory_id, &c.file_path) {
        (Some(id), _) => DrillHint::GetMemory(id.clone()),
        (None, Some(path)) => DrillHint::OpenFile(path.clone()),
        (None, None) => DrillHint::OpenFile(c.id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    struct AlwaysUnavailable;

    #[async_trait]
    impl MiniCotProvider for AlwaysUnavailable {
        async fn is_available(&self) -> bool {
            false
        }
        async fn score_gallery(&self, _query: &str, _items: &[CotCandidateSnippet]) -> Result<Vec<CotVerdict>> {
            unreachable!("should short-circuit on is_available")
        }
    }

    struct FixedGallery(Vec<CotVerdict>);

    #[async_trait]
    impl MiniCotProvider for FixedGallery {
        async fn is_available(&self) -> bool {
            true
        }
        async fn score_gallery(&self, _query: &str, _items: &[CotCandidateSnippet]) -> Result<Vec<CotVerdict>> {
            Ok(self.0.clone())
        }
    }

    fn candidate(id: &str, similarity: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            similarity,
            content_preview: "fn foo() {}".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unavailable_provider_falls_back_to_similarity_only() {
        let scorer = MiniCotScorer::new();
        let candidates = vec![candidate("a", 0.9)];
        let batch = scorer.score("q", &candidates, &AlwaysUnavailable).await;
        assert_eq!(batch.method, ScoringMethod::Fallback);
        assert_eq!(batch.candidates[0].score, 0.9);
    }

    #[tokio::test]
    async fn hybrid_score_uses_weighted_combination() {
        let scorer = MiniCotScorer::new();
        let candidates = vec![candidate("a", 1.0)];
        let provider = FixedGallery(vec![CotVerdict {
            memory_id: "a".to_string(),
            relevance: 0.5,
            cot: "looks relevant".to_string(),
        }]);
        let batch = scorer.score("q", &candidates, &provider).await;
        assert_eq!(batch.method, ScoringMethod::Hybrid);
        // 0.4 * 1.0 + 0.6 * 0.5 = 0.7
        assert!((batch.candidates[0].score - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn candidate_missing_from_gallery_keeps_similarity_only_score() {
        let scorer = MiniCotScorer::new();
        let candidates = vec![candidate("missing", 0.42)];
        let provider = FixedGallery(vec![]);
        let batch = scorer.score("q", &candidates, &provider).await;
        assert_eq!(batch.candidates[0].score, 0.42);
        assert!(batch.candidates[0].cot_relevance.is_none());
    }

    #[test]
    fn attribution_priority_favors_memory_role_over_tags() {
        let mut c = candidate("a", 0.5);
        c.memory_role = Some("assistant".to_string());
        c.memory_tags = vec!["role:user".to_string()];
        assert_eq!(attribute(&c), Attribution::Assistant);
    }

    #[test]
    fn attribution_falls_back_to_tag_family() {
        let mut c = candidate("a", 0.5);
        c.memory_tags = vec!["user-code".to_string()];
        assert_eq!(attribute(&c), Attribution::UserCode);
    }

    #[test]
    fn attribution_defaults_to_unknown() {
        let c = candidate("a", 0.5);
        assert_eq!(attribute(&c), Attribution::Unknown);
    }

    #[test]
    fn drill_hint_prefers_memory_id_over_file_path() {
        let mut c = candidate("a", 0.5);
        c.memory_id = Some("mem-1".to_string());
        c.file_path = Some("src/lib.rs".to_string());
        assert_eq!(drill_hint(&c), DrillHint::GetMemory("mem-1".to_string()));
    }

    #[test]
    fn drill_hint_opens_file_without_memory_id() {
        let mut c = candidate("a", 0.5);
        c.file_path = Some("src/lib.rs".to_string());
        assert_eq!(drill_hint(&c), DrillHint::OpenFile("src/lib.rs".to_string()));
    }

    #[test]
    fn attribution_summary_renders_each_bucket() {
        let scorer = MiniCotScorer::new();
        let mut user_code = candidate("a", 0.5);
        user_code.memory_tags = vec!["user-code".to_string()];
        let unknown = candidate("b", 0.5);
        let batch = scorer.fallback(&[user_code, unknown]);
        assert_eq!(batch.attribution_summary(), "user-code: 1, unknown: 1");
    }

    #[test]
    fn snippet_truncates_preview_and_memory_context() {
        let mut c = candidate("a", 0.5);
        c.content_preview = "x".repeat(500);
        c.memory_content = Some("y".repeat(500));
        let snippet = build_snippet(&c);
        assert!(snippet.snippet.len() < 500);
    }
}
