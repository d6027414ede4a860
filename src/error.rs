use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    /// A hard precondition failed (empty schema, explore not loaded).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("No API key configured for {provider}. Set the 'api_key' user attribute or the {provider}_api_key setting.")]
    MissingCredential { provider: String },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{provider} API error ({status}): {body}")]
    LlmStatus {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{service} API error ({status}): {message}")]
    Api {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A turn is already in progress")]
    TurnInProgress,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssistantError {
    /// HTTP status carried by upstream failures, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AssistantError::LlmStatus { status, .. } | AssistantError::Api { status, .. } => {
                Some(*status)
            }
            AssistantError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for failures the user must fix before any query can run.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            AssistantError::Precondition(_) | AssistantError::MissingCredential { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_exposed_for_upstream_errors() {
        let err = AssistantError::Api {
            service: "looker".to_string(),
            status: 403,
            message: "Forbidden".to_string(),
        };
        assert_eq!(err.status(), Some(403));
        assert!(!err.is_precondition());

        let err = AssistantError::MissingCredential {
            provider: "gemini".to_string(),
        };
        assert_eq!(err.status(), None);
        assert!(err.is_precondition());
    }
}
