//! Chat-send handling.
//!
//! [`ChatService::send`] answers one inbound chat message. It never fails:
//! history and retrieval errors are logged and treated as "nothing found",
//! and the orchestrator guarantees a non-empty reply. Persisting the
//! message and the reply belongs to the chat backend.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::conversation::{ConversationOrchestrator, Reply};
use crate::history::load_history;
use crate::models::Role;
use crate::prompt::ChatRequest;
use crate::retrieval::RetrievalService;

/// Inbound chat message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendRequest {
    pub chat_id: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default = "default_sender_role")]
    pub sender_role: String,
    pub text: String,
}

fn default_sender_role() -> String {
    "customer".to_string()
}

pub struct ChatService {
    pool: SqlitePool,
    retrieval: Arc<dyn RetrievalService>,
    orchestrator: Arc<ConversationOrchestrator>,
    history_limit: i64,
}

impl ChatService {
    pub fn new(
        pool: SqlitePool,
        retrieval: Arc<dyn RetrievalService>,
        orchestrator: Arc<ConversationOrchestrator>,
        history_limit: i64,
    ) -> Self {
        Self {
            pool,
            retrieval,
            orchestrator,
            history_limit,
        }
    }

    pub async fn send(&self, message: &ChatSendRequest) -> Reply {
        let text = message.text.trim();
        if text.is_empty() {
            return self.orchestrator.fallback();
        }
        debug!(
            chat_id = %message.chat_id,
            sender_id = %message.sender_id,
            role = Role::parse(&message.sender_role).label(),
            "chat message received"
        );

        // Canned answers skip retrieval and history entirely.
        if let Some(reply) = self.orchestrator.canned_reply(text) {
            return reply;
        }

        let context = match self.retrieval.retrieve(text, None, None).await {
            Ok(result) if result.has_context => Some(result.context),
            Ok(_) => None,
            Err(e) => {
                warn!(chat_id = %message.chat_id, error = %e, "retrieval failed; answering without context");
                None
            }
        };

        let history = match load_history(&self.pool, &message.chat_id, self.history_limit).await {
            Ok(h) => h,
            Err(e) => {
                warn!(chat_id = %message.chat_id, error = %e, "history unavailable");
                Vec::new()
            }
        };

        let request = ChatRequest::new(&message.chat_id, text)
            .with_history(history)
            .with_document_context(context);
        self.orchestrator.respond(&request).await
    }
}
