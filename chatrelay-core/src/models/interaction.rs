use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of `user_interactions`. `conversation_memory` holds the encoded
/// [`ConversationHistory`](crate::history::ConversationHistory).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserInteraction {
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub conversation_memory: String,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
