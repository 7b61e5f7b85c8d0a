//! Conversation store: per-user history rows in `user_interactions`.
//!
//! Reads hand back the row's `revision`; write-back only succeeds if the row
//! still carries that revision (or, for a first message, if no row exists yet).
//! A lost race surfaces as [`StoreError::Conflict`] and leaves the winner's
//! history in place.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::history::ConversationHistory;
use crate::models::UserInteraction;

/// A user's conversation as resolved at the start of a turn.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub user_id: i64,
    pub user_name: String,
    pub history: ConversationHistory,
    /// `None` when no row exists yet for this user.
    pub revision: Option<i64>,
}

impl ConversationState {
    pub fn is_new(&self) -> bool {
        self.revision.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find(&self, user_id: i64) -> Result<Option<UserInteraction>, StoreError> {
        let row = sqlx::query_as::<_, UserInteraction>(
            "SELECT id, user_id, user_name, conversation_memory, revision, created_at, updated_at \
             FROM user_interactions WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Resolve the conversation for `user_id`, starting an empty one if the
    /// user has never written before.
    pub async fn load(&self, user_id: i64, user_name: &str) -> Result<ConversationState, StoreError> {
        match self.find(user_id).await? {
            Some(row) => {
                let history = ConversationHistory::decode(&row.conversation_memory)?;
                tracing::info!(user_id, turns = history.len(), "Existing user, continuing conversation");
                Ok(ConversationState {
                    user_id,
                    user_name: row.user_name,
                    history,
                    revision: Some(row.revision),
                })
            }
            None => {
                tracing::info!(user_id, "New user, starting conversation");
                Ok(ConversationState {
                    user_id,
                    user_name: user_name.to_string(),
                    history: ConversationHistory::new(),
                    revision: None,
                })
            }
        }
    }

    /// Persist `history` for the user in `state`. Returns the row's new revision.
    pub async fn save(
        &self,
        state: &ConversationState,
        history: &ConversationHistory,
    ) -> Result<i64, StoreError> {
        let encoded = history.encode()?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let revision = match state.revision {
            Some(expected) => {
                let result = sqlx::query(
                    "UPDATE user_interactions \
                     SET conversation_memory = ?, revision = revision + 1, updated_at = ? \
                     WHERE user_id = ? AND revision = ?",
                )
                .bind(&encoded)
                .bind(now)
                .bind(state.user_id)
                .bind(expected)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict {
                        user_id: state.user_id,
                    });
                }
                expected + 1
            }
            None => {
                let inserted = sqlx::query(
                    "INSERT INTO user_interactions \
                     (user_id, user_name, conversation_memory, revision, created_at, updated_at) \
                     VALUES (?, ?, ?, 0, ?, ?)",
                )
                .bind(state.user_id)
                .bind(&state.user_name)
                .bind(&encoded)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await;

                match inserted {
                    Ok(_) => 0,
                    Err(e) if is_unique_violation(&e) => {
                        return Err(StoreError::Conflict {
                            user_id: state.user_id,
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        tx.commit().await?;

        if state.is_new() {
            tracing::info!(user_id = state.user_id, "New user added to the database");
        } else {
            tracing::info!(user_id = state.user_id, revision, "Updated conversation memory");
        }

        Ok(revision)
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}
