use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Command text that does not match the command grammar.
    #[error("Syntax error: {message} in `{text}`")]
    Syntax { text: String, message: String },

    /// One or more code names in a command do not exist in the catalog.
    #[error("Unknown references: {}", .0.join("; "))]
    Reference(Vec<String>),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// A workflow graph lacks the structure an injection needs.
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn syntax(text: &str, message: impl Into<String>) -> Self {
        Self::Syntax {
            text: text.to_string(),
            message: message.into(),
        }
    }
}
