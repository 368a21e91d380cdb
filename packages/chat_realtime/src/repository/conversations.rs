//! Conversations and their participants.

use anyhow::{Context, Result};
use sqlx::Row;

use super::ChatRepository;
use crate::directory::{ConversationId, Participant, UserId};

impl ChatRepository {
    pub async fn create_conversation(
        &self,
        id: &str,
        is_group: bool,
        name: Option<&str>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO conversations (id, is_group, name) VALUES (?, ?, ?)")
            .bind(id)
            .bind(is_group)
            .bind(name)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create conversation {}", id))?;
        Ok(())
    }

    /// Add `user_id` to a conversation, or update its admin flag if already a member.
    pub async fn add_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
        is_admin: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO participants (user_id, conversation_id, is_admin)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, conversation_id) DO UPDATE SET is_admin = excluded.is_admin
            "#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(is_admin)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to add {} to {}", user_id, conversation_id))?;
        Ok(())
    }

    /// Returns true if a membership row was deleted.
    pub async fn remove_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM participants WHERE user_id = ? AND conversation_id = ?")
            .bind(user_id)
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to remove {} from {}", user_id, conversation_id))?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn get_participant(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> sqlx::Result<Option<Participant>> {
        let row = sqlx::query(
            "SELECT user_id, conversation_id, is_admin FROM participants WHERE user_id = ? AND conversation_id = ?",
        )
        .bind(user_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| participant_from_row(&r)))
    }

    pub(crate) async fn participants_of(
        &self,
        conversation_id: &str,
    ) -> sqlx::Result<Vec<Participant>> {
        let rows = sqlx::query(
            "SELECT user_id, conversation_id, is_admin FROM participants WHERE conversation_id = ? ORDER BY user_id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(participant_from_row).collect())
    }

    pub(crate) async fn conversation_ids_for(
        &self,
        user_id: &str,
    ) -> sqlx::Result<Vec<ConversationId>> {
        sqlx::query_scalar(
            "SELECT conversation_id FROM participants WHERE user_id = ? ORDER BY conversation_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Distinct users sharing any conversation with `user_id`, in one query.
    pub(crate) async fn counterparts_of(&self, user_id: &str) -> sqlx::Result<Vec<UserId>> {
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT p2.user_id
            FROM participants p1
            JOIN participants p2 ON p1.conversation_id = p2.conversation_id
            WHERE p1.user_id = ? AND p2.user_id != ?
            ORDER BY p2.user_id
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }
}

fn participant_from_row(r: &sqlx::sqlite::SqliteRow) -> Participant {
    Participant {
        user_id: r.get("user_id"),
        conversation_id: r.get("conversation_id"),
        is_admin: r.get::<i64, _>("is_admin") != 0,
    }
}
