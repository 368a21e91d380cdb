use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chat_auth::TokenService;
use tokio::sync::{Notify, mpsc};

use crate::AppState;
use crate::config::RealtimeConfig;
use crate::db::Database;
use crate::directory::{ConversationId, Directory, DirectoryError, Participant, User, UserId};
use crate::metrics::ServerMetrics;
use crate::repository::ChatRepository;
use crate::ws::{Connection, Outbound, RealtimeHub};

pub const TEST_SECRET: &[u8] = b"chat-realtime-test-secret-0123456789";

/// Fresh repository backed by an in-memory SQLite database with all
/// migrations applied.
pub async fn test_repository() -> ChatRepository {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma");

    ChatRepository::new(pool)
}

/// Repository with a small fixed social graph:
///
/// - `conv-ab`: alice (admin), bob
/// - `conv-abc` (group "Team"): alice (admin), bob, carol
/// - `conv-cd`: carol, dave
/// - erin exists but has no conversations
pub async fn seeded_repository() -> Arc<ChatRepository> {
    let repo = test_repository().await;

    for (id, name) in [
        ("alice", "Alice"),
        ("bob", "Bob"),
        ("carol", "Carol"),
        ("dave", "Dave"),
        ("erin", "Erin"),
    ] {
        repo.create_user(id, name, id, None).await.expect("user");
    }

    repo.create_conversation("conv-ab", false, None)
        .await
        .expect("conversation");
    repo.create_conversation("conv-abc", true, Some("Team"))
        .await
        .expect("conversation");
    repo.create_conversation("conv-cd", false, None)
        .await
        .expect("conversation");

    for (conv, user, admin) in [
        ("conv-ab", "alice", true),
        ("conv-ab", "bob", false),
        ("conv-abc", "alice", true),
        ("conv-abc", "bob", false),
        ("conv-abc", "carol", false),
        ("conv-cd", "carol", false),
        ("conv-cd", "dave", false),
    ] {
        repo.add_participant(conv, user, admin)
            .await
            .expect("participant");
    }

    Arc::new(repo)
}

/// Directory that can hold one counterpart lookup open until released.
pub struct GatedDirectory {
    inner: Arc<ChatRepository>,
    stall: AtomicBool,
    /// Signalled when the stalled lookup has started.
    pub entered: Notify,
    /// Lets the stalled lookup finish.
    pub release: Notify,
}

impl GatedDirectory {
    pub fn new(inner: Arc<ChatRepository>) -> Self {
        Self {
            inner,
            stall: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn stall_next_counterparts(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Directory for GatedDirectory {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, DirectoryError> {
        self.inner.find_user_by_id(user_id).await
    }

    async fn find_participant(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Participant>, DirectoryError> {
        self.inner.find_participant(user_id, conversation_id).await
    }

    async fn list_participants(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Participant>, DirectoryError> {
        self.inner.list_participants(conversation_id).await
    }

    async fn list_conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationId>, DirectoryError> {
        self.inner.list_conversations_for_user(user_id).await
    }

    async fn list_counterparts(&self, user_id: &str) -> Result<Vec<UserId>, DirectoryError> {
        if self.stall.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.list_counterparts(user_id).await
    }
}

/// An authenticated, unregistered connection plus its outbound queue.
pub fn authed_connection(user_id: &str, capacity: usize) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
    let (conn, rx) = Connection::new(capacity);
    conn.begin_auth();
    conn.authenticate(user_id);
    (conn, rx)
}

/// Short handshake window, heartbeat effectively off unless a test starts it
/// with its own interval.
pub fn test_realtime_config() -> RealtimeConfig {
    RealtimeConfig {
        auth_timeout: Duration::from_secs(1),
        heartbeat_interval: Duration::from_secs(30),
        send_queue_capacity: 64,
        close_flush_timeout: Duration::from_millis(500),
    }
}

pub fn test_hub(repo: Arc<ChatRepository>) -> Arc<RealtimeHub> {
    RealtimeHub::new(
        test_realtime_config(),
        repo,
        Arc::new(TokenService::new(TEST_SECRET)),
        Arc::new(ServerMetrics::new()),
    )
}

/// Fully-wired `AppState` over the seeded in-memory database.
pub async fn test_app_state() -> AppState {
    test_app_state_with(test_realtime_config()).await
}

pub async fn test_app_state_with(config: RealtimeConfig) -> AppState {
    let repository = seeded_repository().await;
    let metrics = Arc::new(ServerMetrics::new());
    let hub = RealtimeHub::new(
        config,
        repository.clone(),
        Arc::new(TokenService::new(TEST_SECRET)),
        metrics.clone(),
    );

    AppState {
        hub,
        db: Arc::new(Database {
            pool: repository.pool.clone(),
        }),
        metrics,
    }
}

/// Serve the router on an ephemeral port and return its address.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, crate::router(state)).await;
    });
    addr
}
