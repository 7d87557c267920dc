//! External interface traits (spec §6, SPEC_FULL §4.8) and the minimal
//! concrete adapters that make this subsystem runnable without the real
//! embedding service, Mini-COT model, or compression codec.
//!
//! These collaborators are explicitly out of scope (spec §1) — this module
//! defines the seam, not their internals.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Result, SpecMemError};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

/// One candidate snippet submitted to the Mini-COT gallery endpoint (spec
/// §6, §4.7).
#[derive(Debug, Clone, Serialize)]
pub struct CotCandidateSnippet {
    pub id: String,
    pub keywords: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CotVerdict {
    pub memory_id: String,
    pub relevance: f64,
    pub cot: String,
}

#[async_trait]
pub trait MiniCotProvider: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn score_gallery(
        &self,
        query: &str,
        items: &[CotCandidateSnippet],
    ) -> Result<Vec<CotVerdict>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    Light,
    Full,
}

pub trait CompressionCodec: Send + Sync {
    fn compress(&self, text: &str, level: CompressionLevel) -> String;
}

/// Identity codec — the seam where the real dictionary-learned compression
/// codec (out of scope, spec §1) attaches. `None` level is a passthrough by
/// definition; this adapter makes all three levels passthroughs.
pub struct NullCompressionCodec;

impl CompressionCodec for NullCompressionCodec {
    fn compress(&self, text: &str, _level: CompressionLevel) -> String {
        text.to_string()
    }
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Duplex request/response over a local socket (spec §6): one JSON object
/// per line in, one JSON object per line out. Used for both the embedding
/// service and the Mini-COT service, which share this shape.
async fn socket_roundtrip(addr: &str, request: &serde_json::Value) -> io::Result<serde_json::Value> {
    let mut stream = TcpStream::connect(addr).await?;
    let mut line = serde_json::to_string(request).unwrap_or_default();
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;
    serde_json::from_str(response_line.trim())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Embedding provider backed by the duplex socket protocol: request
/// `{text}`, response `{embedding: [...]}`  or `{error: "..."}`.
pub struct SocketEmbeddingProvider {
    addr: String,
}

impl SocketEmbeddingProvider {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl EmbeddingProvider for SocketEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = serde_json::json!({ "text": text });
        let response = timeout(REQUEST_TIMEOUT, socket_roundtrip(&self.addr, &request))
            .await
            .map_err(|_| SpecMemError::transient("embedding service timed out"))?
            .map_err(|e| SpecMemError::transient(format!("embedding socket error: {e}")))?;

        if let Some(err) = response.get("error").and_then(|v| v.as_str()) {
            return Err(SpecMemError::transient(format!("embedding service: {err}")));
        }
        let embedding = response
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| SpecMemError::transient("embedding service: malformed response"))?;
        Ok(embedding
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|f| f as f32)
            .collect())
    }
}

/// Mini-COT provider backed by the duplex socket protocol (spec §6):
/// request `{query, memories: [...]}`, response `{gallery: [...]}`.
pub struct SocketMiniCotProvider {
    addr: String,
}

impl SocketMiniCotProvider {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl MiniCotProvider for SocketMiniCotProvider {
    async fn is_available(&self) -> bool {
        TcpStream::connect(&self.addr).await.is_ok()
    }

    async fn score_gallery(
        &self,
        query: &str,
        items: &[CotCandidateSnippet],
    ) -> Result<Vec<CotVerdict>> {
        let request = serde_json::json!({ "query": query, "memories": items });
        let response = timeout(REQUEST_TIMEOUT, socket_roundtrip(&self.addr, &request))
            .await
            .map_err(|_| SpecMemError::transient("mini-cot service timed out"))?
            .map_err(|e| SpecMemError::transient(format!("mini-cot socket error: {e}")))?;

        let gallery = response
            .get("gallery")
            .cloned()
            .ok_or_else(|| SpecMemError::transient("mini-cot service: malformed response"))?;
        serde_json::from_value(gallery)
            .map_err(|e| SpecMemError::transient(format!("mini-cot service: bad gallery: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_codec_is_passthrough_at_every_level() {
        let codec = NullCompressionCodec;
        for level in [CompressionLevel::None, CompressionLevel::Light, CompressionLevel::Full] {
            assert_eq!(codec.compress("hello world", level), "hello world");
        }
    }
}
