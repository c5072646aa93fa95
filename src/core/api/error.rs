use regex::Regex;
use std::sync::OnceLock;

/// Longest raw-body excerpt surfaced in an error.
pub const EXCERPT_LIMIT: usize = 500;

/// Classified platform HTTP failures. None of these are retried automatically.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("Not authenticated on the platform, sign in again: {message}")]
    NotAuthenticated { message: String },

    #[error("Forbidden, the session or its CSRF token was rejected: {message}")]
    Forbidden { message: String },

    #[error("CSRF token expired, reload the platform session: {message}")]
    CsrfExpired { message: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("The platform rejected the request: {0}")]
    Rejected(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid JSON in response: {0}")]
    InvalidJson(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Maps a non-success status plus its body to an actionable error.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_message(body);
        match status {
            401 => ApiError::NotAuthenticated { message },
            403 => ApiError::Forbidden { message },
            419 => ApiError::CsrfExpired { message },
            _ => ApiError::Http { status, message },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotAuthenticated { .. } => Some(401),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::CsrfExpired { .. } => Some(419),
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classifies a transport failure by its message when the client did not
    /// flag it precisely.
    pub fn from_transport(message: &str, timeout_secs: u64) -> Self {
        static TIMEOUT: OnceLock<Regex> = OnceLock::new();
        let timeout = TIMEOUT.get_or_init(|| {
            Regex::new(r"(?i)\b(timed?\s*out|deadline|aborted)\b").expect("valid regex")
        });
        if timeout.is_match(message) {
            ApiError::Timeout(timeout_secs)
        } else {
            ApiError::Network(truncate(message, EXCERPT_LIMIT))
        }
    }
}

/// Pulls `message` or `error` out of a JSON body; otherwise returns the text
/// with markup stripped, truncated to `EXCERPT_LIMIT` characters.
pub fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["message", "error"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str())
                && !text.is_empty()
            {
                return text.to_string();
            }
        }
    }

    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"));
    let stripped = tags.replace_all(body, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&collapsed, EXCERPT_LIMIT)
}

/// Cuts `text` to at most `limit` characters, ellipsis included.
pub fn truncate(text: &str, limit: usize) -> String {
    const ELLIPSIS: &str = "...";
    if text.chars().nth(limit).is_none() {
        return text.to_string();
    }
    let keep = limit.saturating_sub(ELLIPSIS.len());
    let end = text.char_indices().nth(keep).map_or(text.len(), |(idx, _)| idx);
    format!("{}{}", &text[..end], ELLIPSIS)
}
