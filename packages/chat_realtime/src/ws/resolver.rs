//! Participant resolution against the directory.

use std::sync::Arc;

use crate::directory::{Directory, DirectoryError, UserId};

#[derive(Clone)]
pub struct ParticipantResolver {
    directory: Arc<dyn Directory>,
}

impl ParticipantResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Every participant of `conversation_id`.
    pub async fn participants(&self, conversation_id: &str) -> Result<Vec<UserId>, DirectoryError> {
        Ok(self
            .directory
            .list_participants(conversation_id)
            .await?
            .into_iter()
            .map(|p| p.user_id)
            .collect())
    }

    pub async fn is_participant(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<bool, DirectoryError> {
        Ok(self
            .directory
            .find_participant(user_id, conversation_id)
            .await?
            .is_some())
    }

    /// Users sharing at least one conversation with `user_id`, excluding it.
    pub async fn counterparts(&self, user_id: &str) -> Result<Vec<UserId>, DirectoryError> {
        self.directory.list_counterparts(user_id).await
    }
}
