//! Users table.

use anyhow::{Context, Result};
use sqlx::Row;

use super::ChatRepository;
use crate::directory::User;

impl ChatRepository {
    pub async fn create_user(
        &self,
        id: &str,
        name: &str,
        username: &str,
        avatar: Option<&str>,
    ) -> Result<User> {
        sqlx::query("INSERT INTO users (id, name, username, avatar) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(username)
            .bind(avatar)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create user {}", id))?;

        Ok(User {
            id: id.to_string(),
            name: name.to_string(),
            username: username.to_string(),
            avatar: avatar.map(str::to_string),
        })
    }

    pub async fn get_user(&self, id: &str) -> sqlx::Result<Option<User>> {
        let row = sqlx::query("SELECT id, name, username, avatar FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            name: r.get("name"),
            username: r.get("username"),
            avatar: r.get("avatar"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_helpers::test_repository;

    #[tokio::test]
    async fn create_and_get_user() {
        let repo = test_repository().await;
        let created = repo
            .create_user("u1", "User One", "one", Some("https://img/one.png"))
            .await
            .unwrap();

        let fetched = repo.get_user("u1").await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.avatar.as_deref(), Some("https://img/one.png"));
    }

    #[tokio::test]
    async fn duplicate_username_rejected() {
        let repo = test_repository().await;
        repo.create_user("u1", "A", "same", None).await.unwrap();
        assert!(repo.create_user("u2", "B", "same", None).await.is_err());
    }
}
