use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConciergeError {
    /// A required setting is missing or out of range.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A remote service answered with an error status or an unusable payload.
    #[error("upstream error: {0}")]
    Upstream(String),
    /// Caller-supplied arguments were rejected before any network attempt.
    #[error("validation error: {0}")]
    Validation(String),
    /// The out-of-process tool call could not be completed.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConciergeError {
    pub fn missing_setting(name: &str) -> Self {
        ConciergeError::Configuration(format!("missing required setting: {}", name))
    }

    pub fn upstream<E: std::fmt::Display>(err: E) -> Self {
        ConciergeError::Upstream(err.to_string())
    }

    pub fn transport<E: std::fmt::Display>(err: E) -> Self {
        ConciergeError::Transport(err.to_string())
    }

    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        ConciergeError::Storage(err.to_string())
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ConciergeError::Internal(err.to_string())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ConciergeError::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ConciergeError::Validation(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ConciergeError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_setting_names_the_variable() {
        let err = ConciergeError::missing_setting("AZURE_OPENAI_API_KEY");
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "configuration error: missing required setting: AZURE_OPENAI_API_KEY"
        );
    }

    #[test]
    fn helpers_keep_the_source_message() {
        let err = ConciergeError::upstream("status 503");
        assert!(matches!(err, ConciergeError::Upstream(ref m) if m == "status 503"));
        assert!(!err.is_validation());
    }
}
