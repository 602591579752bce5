//! Core data models for the support subsystem.
//!
//! These types represent the uploaded documents, their chunks, chat history
//! and retrieval results that flow between ingestion, search and the
//! conversation layer.

use serde::{Deserialize, Serialize};

/// An uploaded reference document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub file_id: String,
    pub file_name: String,
    /// Lower-case extension without the dot (`"txt"`, `"pdf"`, ...).
    pub file_type: String,
    pub content_hash: String,
    /// Unix seconds.
    pub uploaded_at: i64,
    pub total_chunks: i64,
}

/// A bounded text segment of a document.
///
/// `start_offset..end_offset` is a character range into the normalized
/// document text; `text` is exactly that range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub chunk_id: String,
    pub file_id: String,
    pub file_name: String,
    pub chunk_index: i64,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Deterministic chunk id for `file_id` and ordinal `index`.
pub fn chunk_id(file_id: &str, index: i64) -> String {
    format!("{}_chunk_{}", file_id, index)
}

/// A chunk matched by similarity search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub file_id: String,
    pub file_name: String,
    pub chunk_index: i64,
    pub text: String,
    pub similarity: f32,
}

/// Outcome of a retrieval query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    /// Concatenated chunk texts, best match first. Empty when nothing matched.
    pub context: String,
    pub chunks: Vec<ScoredChunk>,
    pub has_context: bool,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Response to a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: String,
    pub file_name: String,
    pub total_chunks: i64,
    pub message: String,
}

/// Who wrote a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Assistant,
}

impl Role {
    /// Parses the role strings stored by the chat backend. Staff and admin
    /// replies count as the assistant side of the conversation.
    pub fn parse(s: &str) -> Role {
        match s.trim().to_ascii_lowercase().as_str() {
            "assistant" | "admin" | "staff" | "bot" | "system" => Role::Assistant,
            _ => Role::Customer,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Customer => "Customer",
            Role::Assistant => "Assistant",
        }
    }
}

/// A message from the chat aggregate, consumed read-only as history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub role: Role,
    pub text: String,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_derived_from_file_and_ordinal() {
        assert_eq!(chunk_id("abc", 0), "abc_chunk_0");
        assert_eq!(chunk_id("abc", 12), "abc_chunk_12");
    }

    #[test]
    fn role_parse_maps_staff_to_assistant() {
        assert_eq!(Role::parse("ADMIN"), Role::Assistant);
        assert_eq!(Role::parse("assistant"), Role::Assistant);
        assert_eq!(Role::parse("customer"), Role::Customer);
        assert_eq!(Role::parse("user"), Role::Customer);
    }

    #[test]
    fn retrieval_result_serializes_camel_case() {
        let json = serde_json::to_value(RetrievalResult::empty()).unwrap();
        assert_eq!(json["hasContext"], false);
        assert_eq!(json["context"], "");
    }
}
