//! Chat service: one turn of a user's conversation.
//!
//! resolve state → model call → write-back, all under a per-user lock so that
//! requests for the same `user_id` run one after another in arrival order.
//! The store's revision check still guards against writers in other processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chatrelay_core::{ChatModel, ConversationStore, RelayError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A validated chat request.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub user_id: i64,
    pub user_name: String,
    pub input: String,
}

/// Explicitly constructed context shared by all handlers.
pub struct ChatService {
    store: ConversationStore,
    model: Arc<dyn ChatModel>,
    locks: UserLocks,
}

impl ChatService {
    pub fn new(store: ConversationStore, model: Arc<dyn ChatModel>) -> Self {
        Self {
            store,
            model,
            locks: UserLocks::default(),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Run one exchange and return the assistant's reply.
    ///
    /// Nothing is written unless the model call succeeds, so a failed turn
    /// leaves the stored history as it was.
    pub async fn converse(&self, turn: ChatTurn) -> Result<String, RelayError> {
        let _guard = self.locks.acquire(turn.user_id).await;

        let state = self.store.load(turn.user_id, &turn.user_name).await?;

        let reply = self.model.complete(&state.history, &turn.input).await?;
        tracing::debug!(
            user_id = turn.user_id,
            model = self.model.name(),
            reply_len = reply.len(),
            "Model reply received"
        );

        let mut history = state.history.clone();
        history.push_exchange(turn.input, reply.clone());
        self.store.save(&state, &history).await?;

        Ok(reply)
    }
}

// ============================================================================
// Per-user locks
// ============================================================================

#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    async fn acquire(&self, user_id: i64) -> UserLockGuard<'_> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Entries held only by the map were left behind by cancelled waiters.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(user_id).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        UserLockGuard {
            locks: self,
            user_id,
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct UserLockGuard<'a> {
    locks: &'a UserLocks,
    user_id: i64,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this guard hold the lock: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatrelay_core::config::DatabaseConfig;
    use chatrelay_core::{db, ConversationHistory, ModelError, StoreError, Turn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with a numbered echo of the input.
    struct EchoModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn complete(
            &self,
            history: &ConversationHistory,
            input: &str,
        ) -> Result<String, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(format!("reply {} to '{}' after {} turns", n, input, history.len()))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        async fn complete(&self, _: &ConversationHistory, _: &str) -> Result<String, ModelError> {
            Err(ModelError::RetryExhausted { attempts: 3 })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    async fn memory_store() -> ConversationStore {
        let pool = db::create_pool(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
        .unwrap();
        db::migrate(&pool).await.unwrap();
        ConversationStore::new(pool)
    }

    fn echo() -> Arc<dyn ChatModel> {
        Arc::new(EchoModel {
            calls: AtomicUsize::new(0),
        })
    }

    fn turn(user_id: i64, input: &str) -> ChatTurn {
        ChatTurn {
            user_id,
            user_name: "ada".to_string(),
            input: input.to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_message_creates_one_exchange() {
        let service = ChatService::new(memory_store().await, echo());

        let reply = service.converse(turn(1, "hello")).await.unwrap();
        assert_eq!(reply, "reply 0 to 'hello' after 0 turns");

        let state = service.store().load(1, "ada").await.unwrap();
        assert_eq!(
            state.history.turns(),
            &[Turn::user("hello"), Turn::assistant(reply)]
        );
    }

    #[tokio::test]
    async fn test_sequential_messages_keep_submission_order() {
        let service = ChatService::new(memory_store().await, echo());

        service.converse(turn(2, "first")).await.unwrap();
        service.converse(turn(2, "second")).await.unwrap();
        service.converse(turn(2, "third")).await.unwrap();

        let state = service.store().load(2, "ada").await.unwrap();
        let user_texts: Vec<&str> = state
            .history
            .turns()
            .iter()
            .filter(|t| t.speaker == chatrelay_core::Speaker::User)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(user_texts, vec!["first", "second", "third"]);
        assert_eq!(state.history.len(), 6);
    }

    #[tokio::test]
    async fn test_model_failure_leaves_history_unchanged() {
        let store = memory_store().await;
        let ok = ChatService::new(store.clone(), echo());
        ok.converse(turn(3, "hi")).await.unwrap();
        let before = store.find(3).await.unwrap().unwrap();

        let failing = ChatService::new(store.clone(), Arc::new(FailingModel));
        let err = failing.converse(turn(3, "lost")).await.unwrap_err();
        assert!(matches!(err, RelayError::Model(ModelError::RetryExhausted { .. })));

        let after = store.find(3).await.unwrap().unwrap();
        assert_eq!(after.conversation_memory, before.conversation_memory);
        assert_eq!(after.revision, before.revision);
    }

    #[tokio::test]
    async fn test_model_failure_for_new_user_creates_no_row() {
        let store = memory_store().await;
        let failing = ChatService::new(store.clone(), Arc::new(FailingModel));

        assert!(failing.converse(turn(4, "hi")).await.is_err());
        assert!(store.find(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_history_is_store_error() {
        let store = memory_store().await;
        sqlx::query(
            "INSERT INTO user_interactions (user_id, user_name, conversation_memory, revision, created_at, updated_at) \
             VALUES (6, 'ada', '{\"version\":99,\"turns\":[]}', 0, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let service = ChatService::new(store, echo());
        let err = service.converse(turn(6, "hi")).await.unwrap_err();
        assert!(matches!(err, RelayError::Store(StoreError::History(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_user_loses_no_updates() {
        let service = Arc::new(ChatService::new(memory_store().await, echo()));

        let mut handles = Vec::new();
        for i in 0..10 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.converse(turn(8, &format!("msg {}", i))).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let state = service.store().load(8, "ada").await.unwrap();
        assert_eq!(state.history.len(), 20, "every exchange must be kept");
        assert_eq!(state.revision, Some(9));
        assert_eq!(service.locks.len(), 0, "idle locks are pruned");
    }

    #[tokio::test]
    async fn test_cancelled_waiter_entry_is_pruned() {
        let locks = UserLocks::default();

        let holder = locks.acquire(1).await;
        let mut waiter = Box::pin(locks.acquire(1));
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), &mut waiter).await;
        assert!(timed_out.is_err(), "waiter must block while the lock is held");

        // Holder releases while the waiter is still parked, then the waiter gives up.
        drop(holder);
        drop(waiter);

        let other = locks.acquire(2).await;
        assert_eq!(locks.len(), 1, "only the live user's lock remains");
        drop(other);
        assert_eq!(locks.len(), 0);
    }
}
