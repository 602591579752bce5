//! Read-only access to stored chat messages.

use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::{ConversationMessage, Role};

/// The most recent `limit` messages of `chat_id`, oldest first.
pub async fn load_history(
    pool: &SqlitePool,
    chat_id: &str,
    limit: i64,
) -> Result<Vec<ConversationMessage>> {
    if limit <= 0 {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(
        r#"
        SELECT sender_role, text, sent_at, is_read
        FROM chat_messages
        WHERE chat_id = ?
        ORDER BY sent_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(chat_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut messages: Vec<ConversationMessage> = rows
        .iter()
        .map(|row| {
            let role: String = row.get("sender_role");
            let read: i64 = row.get("is_read");
            ConversationMessage {
                role: Role::parse(&role),
                text: row.get("text"),
                timestamp: row.get("sent_at"),
                read: read != 0,
            }
        })
        .collect();
    messages.reverse();
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn returns_latest_messages_oldest_first() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();

        for (i, (role, text)) in [
            ("customer", "hello"),
            ("admin", "hi, how can we help?"),
            ("customer", "is milk fresh?"),
        ]
        .iter()
        .enumerate()
        {
            sqlx::query(
                "INSERT INTO chat_messages (chat_id, sender_role, text, sent_at, is_read) VALUES ('c1', ?, ?, ?, 1)",
            )
            .bind(*role)
            .bind(*text)
            .bind(100 + i as i64)
            .execute(&pool)
            .await
            .unwrap();
        }

        let history = load_history(&pool, "c1", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::Assistant);
        assert_eq!(history[1].text, "is milk fresh?");
        assert!(history[1].read);

        assert!(load_history(&pool, "other", 10).await.unwrap().is_empty());
    }
}
