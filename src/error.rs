use llm::error::LLMError;

/// Failure reported by a [`CompletionProvider`](crate::llm::CompletionProvider).
///
/// The first four variants are transient and retried by the invoker; `Other`
/// covers everything else and is surfaced immediately.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("provider internal server error: {0}")]
    InternalServer(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    /// Whether the failure is expected to clear up on a plain retry.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::Other(_))
    }

    /// Short name of the failure kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::RateLimit(_) => "rate_limit",
            ProviderError::Connection(_) => "connection",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::InternalServer(_) => "internal_server",
            ProviderError::Other(_) => "other",
        }
    }

    /// Classify a free-form provider message by the phrases model hosts use
    /// for transient trouble.
    ///
    /// Only whole phrases count; status digits and bare words such as
    /// "connection" are too easy to hit in request bodies and error details.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("rate limit") || lower.contains("too many requests") {
            return ProviderError::RateLimit(message);
        }

        if lower.contains("timed out") {
            return ProviderError::Timeout(message);
        }

        if lower.contains("connection refused")
            || lower.contains("connection reset")
            || lower.contains("connection closed")
            || lower.contains("dns error")
        {
            return ProviderError::Connection(message);
        }

        if lower.contains("internal server error")
            || lower.contains("bad gateway")
            || lower.contains("service unavailable")
            || lower.contains("gateway timeout")
            || lower.contains("overloaded")
        {
            return ProviderError::InternalServer(message);
        }

        ProviderError::Other(anyhow::anyhow!(message))
    }

    /// Map an `llm` crate error to a failure kind.
    ///
    /// The variant decides first. Error replies from a host are classified by
    /// the HTTP status in `message`; the raw response body is never inspected.
    pub fn from_llm(err: &LLMError) -> Self {
        let text = err.to_string();
        match err {
            LLMError::ResponseFormatError { message, .. } => match http_status(message) {
                Some(429) => ProviderError::RateLimit(text),
                Some(408) => ProviderError::Timeout(text),
                Some(500..=599) => ProviderError::InternalServer(text),
                _ => ProviderError::Other(anyhow::anyhow!(text)),
            },
            LLMError::HttpError(message) => {
                let lower = message.to_lowercase();
                if lower.contains("timed out") || lower.contains("timeout") {
                    ProviderError::Timeout(text)
                } else if lower.starts_with("error sending request")
                    || lower.starts_with("request or response body error")
                    || lower.contains("connection")
                    || lower.contains("dns error")
                {
                    ProviderError::Connection(text)
                } else {
                    ProviderError::Other(anyhow::anyhow!(text))
                }
            }
            LLMError::ProviderError(_) | LLMError::Generic(_) => ProviderError::classify(text),
            LLMError::AuthError(_)
            | LLMError::InvalidRequest(_)
            | LLMError::JsonError(_)
            | LLMError::ToolConfigError(_)
            | LLMError::RetryExceeded { .. } => ProviderError::Other(anyhow::anyhow!(text)),
        }
    }
}

/// Status code from an "... returned error status: 503 Service Unavailable" message.
fn http_status(message: &str) -> Option<u16> {
    let (_, rest) = message.rsplit_once("error status:")?;
    let code: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    code.parse().ok()
}

/// Errors surfaced to callers of [`LlmClient`](crate::LlmClient).
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("function_call is empty, it is not a function call: {0}")]
    MissingToolCall(String),

    #[error("function name mismatch: expected {expected}, got {actual}")]
    FunctionNameMismatch { expected: String, actual: String },

    #[error("error decoding the function arguments: {source}")]
    MalformedArguments {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("provider returned no choices")]
    EmptyResponse,

    #[error("configuration error: {0}")]
    Config(String),
}

impl CallError {
    /// The underlying provider failure, if this error came from the transport.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            CallError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_error(status: &str, body: &str) -> LLMError {
        LLMError::ResponseFormatError {
            message: format!("OpenAI API returned error status: {status}"),
            raw_response: body.to_string(),
        }
    }

    #[test]
    fn test_classify_transient_messages() {
        assert!(matches!(
            ProviderError::classify("429 Too Many Requests"),
            ProviderError::RateLimit(_)
        ));
        assert!(matches!(
            ProviderError::classify("rate limit exceeded"),
            ProviderError::RateLimit(_)
        ));
        assert!(matches!(
            ProviderError::classify("operation timed out"),
            ProviderError::Timeout(_)
        ));
        assert!(matches!(
            ProviderError::classify("connection refused"),
            ProviderError::Connection(_)
        ));
        assert!(matches!(
            ProviderError::classify("503 Service Unavailable"),
            ProviderError::InternalServer(_)
        ));
        assert!(matches!(
            ProviderError::classify("API overloaded"),
            ProviderError::InternalServer(_)
        ));
    }

    #[test]
    fn test_classify_fatal_messages() {
        let auth = ProviderError::classify("invalid api key");
        assert!(!auth.is_transient());
        assert_eq!(auth.kind(), "other");

        assert!(!ProviderError::classify("model not found").is_transient());
        // digits and loose words alone do not make a failure transient
        assert!(!ProviderError::classify("max_tokens 4290 is too large").is_transient());
        assert!(!ProviderError::classify("requested 15003 tokens").is_transient());
        assert!(!ProviderError::classify("no connection key configured").is_transient());
    }

    #[test]
    fn test_status_read_from_message_not_body() {
        let err = response_error(
            "400 Bad Request",
            r#"{"error":{"message":"maximum context length is 8192 tokens, you requested 15003 tokens (500 in the messages)"}}"#,
        );
        let mapped = ProviderError::from_llm(&err);
        assert!(!mapped.is_transient());
        assert_eq!(mapped.kind(), "other");

        let err = response_error("404 Not Found", "rate limit connection timed out 503");
        assert!(!ProviderError::from_llm(&err).is_transient());
    }

    #[test]
    fn test_transient_statuses() {
        let kind = |status| ProviderError::from_llm(&response_error(status, "{}")).kind();
        assert_eq!(kind("429 Too Many Requests"), "rate_limit");
        assert_eq!(kind("408 Request Timeout"), "timeout");
        assert_eq!(kind("500 Internal Server Error"), "internal_server");
        assert_eq!(kind("503 Service Unavailable"), "internal_server");
        assert_eq!(kind("529 <unknown status code>"), "internal_server");
        assert_eq!(kind("401 Unauthorized"), "other");
    }

    #[test]
    fn test_undecodable_reply_is_fatal() {
        let err = LLMError::ResponseFormatError {
            message: "Failed to decode OpenAI API response: expected value at line 1".into(),
            raw_response: "<html>502 Bad Gateway</html>".into(),
        };
        assert!(!ProviderError::from_llm(&err).is_transient());
    }

    #[test]
    fn test_http_errors() {
        let mapped = ProviderError::from_llm(&LLMError::HttpError(
            "error sending request for url (http://localhost:8000/v1/chat/completions)".into(),
        ));
        assert_eq!(mapped.kind(), "connection");

        let mapped = ProviderError::from_llm(&LLMError::HttpError("operation timed out".into()));
        assert_eq!(mapped.kind(), "timeout");

        let mapped =
            ProviderError::from_llm(&LLMError::HttpError("error decoding response body".into()));
        assert_eq!(mapped.kind(), "other");
    }

    #[test]
    fn test_request_side_errors_are_fatal() {
        let errors = [
            LLMError::AuthError("no connection key configured".into()),
            LLMError::InvalidRequest("max_tokens 4290 exceeds the limit".into()),
            LLMError::JsonError("timed out waiting for 500 bytes".into()),
            LLMError::ToolConfigError("rate limit tool missing".into()),
        ];
        for err in &errors {
            let mapped = ProviderError::from_llm(err);
            assert!(!mapped.is_transient(), "{err} should not be retried");
            assert_eq!(mapped.to_string(), err.to_string());
        }
    }

    #[test]
    fn test_provider_messages_use_phrases() {
        let mapped =
            ProviderError::from_llm(&LLMError::ProviderError("overloaded_error: Overloaded".into()));
        assert_eq!(mapped.kind(), "internal_server");

        let mapped = ProviderError::from_llm(&LLMError::Generic("model not found".into()));
        assert_eq!(mapped.kind(), "other");
    }

    #[test]
    fn test_other_keeps_message() {
        let err = ProviderError::classify("invalid request: bad schema");
        assert_eq!(err.to_string(), "invalid request: bad schema");
    }

    #[test]
    fn test_provider_error_passes_through_call_error() {
        let err: CallError = ProviderError::Timeout("slow".into()).into();
        assert_eq!(err.to_string(), "request timed out: slow");
        assert!(err.provider_error().is_some_and(|e| e.is_transient()));
    }
}
