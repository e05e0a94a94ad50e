/// Errors produced while reading or writing cache files.
///
/// These never cross the public [`crate::PersistentCache`] API: every cache
/// fault is logged and degrades to a miss or a `false` return.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {message}")]
    Json { message: String },
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        // `serde_json` quotes offending values, which here are file content.
        Self::Json {
            message: redact_quoted(&err.to_string()),
        }
    }
}

/// Replaces everything from the first `"` to the last one. Escaped quotes
/// inside a value fall within that span.
fn redact_quoted(message: &str) -> String {
    let Some(start) = message.find('"') else {
        return message.to_owned();
    };
    match message.rfind('"') {
        Some(end) if end > start => format!(
            "{}\"<redacted>\"{}",
            &message[..start],
            &message[end + 1..]
        ),
        _ => format!("{}<redacted>", &message[..start]),
    }
}
