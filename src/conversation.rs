//! Conversation orchestration.
//!
//! Resolution order for one message:
//!
//! 1. Canned intent match ([`crate::intent`]); the model is not called.
//! 2. Completion over the assembled request, if a client is configured.
//! 3. The configured fallback message.
//!
//! The orchestrator holds no per-chat state. [`respond`](ConversationOrchestrator::respond)
//! always produces a non-empty reply.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::completion::CompletionClient;
use crate::config::default_fallback_message;
use crate::intent::{classify, IntentCategory};
use crate::prompt::ChatRequest;

/// Which stage produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "intent")]
pub enum ReplySource {
    Canned(IntentCategory),
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

pub struct ConversationOrchestrator {
    completion: Option<Arc<CompletionClient>>,
    fallback_message: String,
}

impl ConversationOrchestrator {
    pub fn new(completion: Option<Arc<CompletionClient>>, fallback_message: impl Into<String>) -> Self {
        let fallback_message = fallback_message.into();
        let fallback_message = if fallback_message.trim().is_empty() {
            default_fallback_message()
        } else {
            fallback_message
        };
        Self {
            completion,
            fallback_message,
        }
    }

    /// Canned reply for `message`, if one of the intents matches.
    pub fn canned_reply(&self, message: &str) -> Option<Reply> {
        classify(message).map(|intent| Reply {
            text: intent.reply.to_string(),
            source: ReplySource::Canned(intent.category),
        })
    }

    pub fn fallback(&self) -> Reply {
        Reply {
            text: self.fallback_message.clone(),
            source: ReplySource::Fallback,
        }
    }

    pub async fn respond(&self, request: &ChatRequest) -> Reply {
        if request.user_message.trim().is_empty() {
            return self.fallback();
        }

        if let Some(reply) = self.canned_reply(&request.user_message) {
            debug!(chat_id = %request.chat_id, source = ?reply.source, "canned reply");
            return reply;
        }

        if let Some(client) = &self.completion {
            match client.complete(request).await {
                Some(text) if !text.trim().is_empty() => {
                    info!(chat_id = %request.chat_id, "model reply");
                    return Reply {
                        text: text.trim().to_string(),
                        source: ReplySource::Model,
                    };
                }
                _ => warn!(chat_id = %request.chat_id, "completion produced no answer; using fallback"),
            }
        }

        self.fallback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canned_intent_short_circuits() {
        let orch = ConversationOrchestrator::new(None, "fallback");
        let reply = orch.respond(&ChatRequest::new("c1", "Hello")).await;
        assert_eq!(reply.source, ReplySource::Canned(IntentCategory::Greeting));
    }

    #[tokio::test]
    async fn no_client_uses_fallback() {
        let orch = ConversationOrchestrator::new(None, "Please hold on.");
        let reply = orch
            .respond(&ChatRequest::new("c1", "Is the sourdough gluten free?"))
            .await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.text, "Please hold on.");
    }

    #[tokio::test]
    async fn blank_fallback_is_replaced_with_default() {
        let orch = ConversationOrchestrator::new(None, "   ");
        let reply = orch.respond(&ChatRequest::new("c1", "")).await;
        assert!(!reply.text.trim().is_empty());
    }
}
