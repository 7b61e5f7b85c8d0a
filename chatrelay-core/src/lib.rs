pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod model;
pub mod models;
pub mod store;

pub use config::ChatRelayConfig;
pub use error::{RelayError, StoreError};
pub use history::{ConversationHistory, HistoryError, Speaker, Turn, HISTORY_FORMAT_VERSION};
pub use model::{ChatModel, GeminiChatClient, ModelError};
pub use store::{ConversationState, ConversationStore};
