use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
