//! Read-only view of users and conversation membership.
//!
//! The realtime core never writes membership; the request layer commits its
//! changes through the repository first and then asks the hub to fan out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type UserId = String;
pub type ConversationId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub is_admin: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// The pool is closed or could not hand out a connection in time.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for DirectoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Unavailable(err.to_string())
            }
            other => Self::Database(other),
        }
    }
}

/// Lookup interface over the persistence layer.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, DirectoryError>;

    async fn find_participant(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Participant>, DirectoryError>;

    async fn list_participants(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Participant>, DirectoryError>;

    async fn list_conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationId>, DirectoryError>;

    /// Distinct users sharing at least one conversation with `user_id`,
    /// excluding `user_id` itself.
    async fn list_counterparts(&self, user_id: &str) -> Result<Vec<UserId>, DirectoryError> {
        let mut counterparts = BTreeSet::new();
        for conversation_id in self.list_conversations_for_user(user_id).await? {
            for participant in self.list_participants(&conversation_id).await? {
                if participant.user_id != user_id {
                    counterparts.insert(participant.user_id);
                }
            }
        }
        Ok(counterparts.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Membership table only; exercises the default counterpart resolution.
    struct StaticDirectory {
        members: HashMap<&'static str, Vec<&'static str>>,
    }

    #[async_trait]
    impl Directory for StaticDirectory {
        async fn find_user_by_id(&self, _user_id: &str) -> Result<Option<User>, DirectoryError> {
            Ok(None)
        }

        async fn find_participant(
            &self,
            user_id: &str,
            conversation_id: &str,
        ) -> Result<Option<Participant>, DirectoryError> {
            Ok(self
                .members
                .get(conversation_id)
                .filter(|m| m.iter().any(|u| *u == user_id))
                .map(|_| Participant {
                    user_id: user_id.to_string(),
                    conversation_id: conversation_id.to_string(),
                    is_admin: false,
                }))
        }

        async fn list_participants(
            &self,
            conversation_id: &str,
        ) -> Result<Vec<Participant>, DirectoryError> {
            Ok(self
                .members
                .get(conversation_id)
                .map(|m| {
                    m.iter()
                        .map(|u| Participant {
                            user_id: u.to_string(),
                            conversation_id: conversation_id.to_string(),
                            is_admin: false,
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn list_conversations_for_user(
            &self,
            user_id: &str,
        ) -> Result<Vec<ConversationId>, DirectoryError> {
            Ok(self
                .members
                .iter()
                .filter(|(_, m)| m.iter().any(|u| *u == user_id))
                .map(|(c, _)| c.to_string())
                .collect())
        }
    }

    #[tokio::test]
    async fn default_counterparts_are_distinct_and_exclude_self() {
        let dir = StaticDirectory {
            members: HashMap::from([
                ("c1", vec!["alice", "bob"]),
                ("c2", vec!["alice", "bob", "carol"]),
                ("c3", vec!["dave", "erin"]),
            ]),
        };

        let counterparts = dir.list_counterparts("alice").await.unwrap();
        assert_eq!(counterparts, vec!["bob".to_string(), "carol".to_string()]);

        assert!(dir.list_counterparts("zed").await.unwrap().is_empty());
    }

    #[test]
    fn participant_serializes_camel_case() {
        let p = Participant {
            user_id: "u1".into(),
            conversation_id: "c1".into(),
            is_admin: true,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["isAdmin"], true);
    }
}
