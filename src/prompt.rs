//! Prompt assembly.
//!
//! A [`ChatRequest`] carries everything the model sees: the customer's
//! message, prior turns, and any retrieved document context. [`assemble`]
//! turns it into a [`Transcript`] without side effects:
//!
//! ```text
//! [system]    assistant rules
//! [user/asst] history turns, oldest first
//! [system]    chat id + document context block (if any)
//! [user]      current message
//! ```

use crate::completion::{ChatMessage, Transcript};
use crate::models::{ConversationMessage, Role};

pub const SYSTEM_PROMPT: &str = "You are the customer support assistant for an online grocery delivery service. \
Answer questions about products, orders, delivery, payment, promotions, returns and accounts. \
Be friendly and concise, and answer in the customer's language.\n\
Source priority:\n\
1. Document context provided in this conversation is authoritative. Use it first and do not contradict it.\n\
2. Call a function only for live data the documents cannot contain, such as what expires soon or which promotions are active today.\n\
3. Use general knowledge only when neither applies.\n\
If you do not know an answer, say so and offer to connect the customer with a staff member. Never invent order details or prices.";

pub const CONTEXT_BEGIN: &str = "=== DOCUMENT CONTEXT (MUST USE) ===";
pub const CONTEXT_END: &str = "=== END DOCUMENT CONTEXT ===";

/// Structured input to one completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub chat_id: String,
    pub user_message: String,
    /// Prior messages, oldest first.
    pub history: Vec<ConversationMessage>,
    /// Retrieved context; `None` or blank means none was found.
    pub document_context: Option<String>,
}

impl ChatRequest {
    pub fn new(chat_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_message: user_message.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_document_context(mut self, context: Option<String>) -> Self {
        self.document_context = context;
        self
    }

    pub fn has_document_context(&self) -> bool {
        self.document_context
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }
}

/// Build the first-round transcript for `request`.
pub fn assemble(request: &ChatRequest) -> Transcript {
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];

    let mut history: &[ConversationMessage] = &request.history;
    // The chat backend may already have stored the message being answered.
    if let Some((last, rest)) = history.split_last() {
        if last.role == Role::Customer && last.text.trim() == request.user_message.trim() {
            history = rest;
        }
    }
    messages.extend(
        history
            .iter()
            .filter(|m| !m.text.trim().is_empty())
            .map(|m| match m.role {
                Role::Customer => ChatMessage::user(m.text.trim()),
                Role::Assistant => ChatMessage::assistant(m.text.trim()),
            }),
    );

    messages.push(ChatMessage::system(context_note(request)));
    messages.push(ChatMessage::user(request.user_message.trim()));
    Transcript::from_messages(messages)
}

fn context_note(request: &ChatRequest) -> String {
    let mut note = format!("Conversation: chat {}.", request.chat_id);
    match request.document_context.as_deref().map(str::trim) {
        Some(context) if !context.is_empty() => {
            note.push_str(
                "\nThe following excerpts come from the store's own documents. \
                 You must base your answer on them when they are relevant, \
                 and prefer them over function results for the same fact.\n",
            );
            note.push_str(CONTEXT_BEGIN);
            note.push('\n');
            note.push_str(context);
            note.push('\n');
            note.push_str(CONTEXT_END);
        }
        _ => note.push_str("\nNo document context was found for this question."),
    }
    note
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, text: &str) -> ConversationMessage {
        ConversationMessage {
            role,
            text: text.to_string(),
            timestamp: 0,
            read: true,
        }
    }

    #[test]
    fn minimal_request_has_system_note_and_user() {
        let t = assemble(&ChatRequest::new("c1", "  hi there "));
        let m = t.messages();
        assert_eq!(m.len(), 3);
        assert_eq!(m[0].role, "system");
        assert!(m[1].content.as_deref().unwrap().contains("chat c1"));
        assert_eq!(m[2].role, "user");
        assert_eq!(m[2].content.as_deref(), Some("hi there"));
    }

    #[test]
    fn history_becomes_turns_and_duplicate_tail_is_dropped() {
        let req = ChatRequest::new("c1", "where is my order?").with_history(vec![
            msg(Role::Customer, "hello"),
            msg(Role::Assistant, "Hi! How can I help?"),
            msg(Role::Customer, "where is my order?"),
        ]);
        let t = assemble(&req);
        let roles: Vec<&str> = t.messages().iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "system", "user"]);
    }

    #[test]
    fn document_context_is_fenced() {
        let req = ChatRequest::new("c1", "refund policy?")
            .with_document_context(Some("Refunds within 14 days.".into()));
        assert!(req.has_document_context());
        let t = assemble(&req);
        let note = t.messages()[1].content.clone().unwrap();
        assert!(note.contains(CONTEXT_BEGIN));
        assert!(note.contains("Refunds within 14 days."));
        assert!(note.contains(CONTEXT_END));
    }

    #[test]
    fn blank_context_counts_as_none() {
        let req = ChatRequest::new("c1", "q").with_document_context(Some("  ".into()));
        assert!(!req.has_document_context());
    }
}
