// Repository layer: each table group lives in its own file with `impl ChatRepository`.
//
// The realtime core only sees the `Directory` trait; the inherent write
// methods exist for the request layer and for seeding tests.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use crate::directory::{ConversationId, Directory, DirectoryError, Participant, User, UserId};

mod conversations;
mod users;

#[derive(Clone)]
pub struct ChatRepository {
    pub(crate) pool: SqlitePool,
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for ChatRepository {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, DirectoryError> {
        Ok(self.get_user(user_id).await?)
    }

    async fn find_participant(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Participant>, DirectoryError> {
        Ok(self.get_participant(user_id, conversation_id).await?)
    }

    async fn list_participants(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Participant>, DirectoryError> {
        Ok(self.participants_of(conversation_id).await?)
    }

    async fn list_conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationId>, DirectoryError> {
        Ok(self.conversation_ids_for(user_id).await?)
    }

    async fn list_counterparts(&self, user_id: &str) -> Result<Vec<UserId>, DirectoryError> {
        Ok(self.counterparts_of(user_id).await?)
    }
}
