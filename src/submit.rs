use std::collections::BTreeMap;
use std::time::Duration;

use crate::api::{ApiError, QueryExample};
use crate::fragment;

pub const PATTERN_CONFLICT_MESSAGE: &str = "Invalid pattern combination: \
Cascade and Cycle cannot be enabled at the same time.\n\
Cascade requires exactly one expert result, Cycle requires more than one.\n\
Enable only one of them.";

const TIMEOUT_GUIDANCE: &str = "Query timeout: the query took too long to process. \
This can happen with complex queries. Please try:\n\
1. Simplifying your query\n\
2. Reducing maxResults\n\
3. Disabling reranking or deep research";

const NETWORK_GUIDANCE: &str = "Network error: unable to connect to the server. \
Please check your connection and try again.";

/// Cascade and Cycle are mutually exclusive: Cascade wants exactly one
/// expert result, Cycle wants several. A conflict blocks submission
/// before any request is issued.
pub fn validate_patterns(cascade: bool, cycle: bool) -> Result<(), String> {
    if cascade && cycle {
        Err(PATTERN_CONFLICT_MESSAGE.to_string())
    } else {
        Ok(())
    }
}

/// The submit affordance is live only when the input has content and no
/// submission is already in flight.
pub fn submit_enabled(input: &str, submitting: bool) -> bool {
    !submitting && !input.trim().is_empty()
}

/// Cosmetic elapsed-time line shown while a submission is pending.
pub fn progress_message(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let minutes = total / 60;
    let seconds = total % 60;
    let time_text = if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    };
    format!("Processing your query... ({time_text} elapsed)")
}

/// Map a failed request to guidance a person can act on. Timeout and
/// connectivity problems get friendlier phrasing; server errors surface
/// their status and body as-is.
pub fn friendly_error(error: &ApiError) -> String {
    match error {
        ApiError::Timeout => TIMEOUT_GUIDANCE.to_string(),
        ApiError::Network(_) => NETWORK_GUIDANCE.to_string(),
        ApiError::Server { status, message } => format!("Server error: {status}\n{message}"),
        ApiError::Http(detail) => {
            let lowered = detail.to_lowercase();
            if lowered.contains("timeout") {
                TIMEOUT_GUIDANCE.to_string()
            } else if lowered.contains("failed to fetch") || lowered.contains("connection") {
                NETWORK_GUIDANCE.to_string()
            } else {
                detail.clone()
            }
        }
    }
}

/// Alert fragment injected into the results region on failure. The
/// message is escaped before insertion; newlines become line breaks.
pub fn error_fragment(message: &str) -> String {
    format!(
        "<div class=\"alert alert-danger\"><strong>Error processing query:</strong><br>{}</div>",
        fragment::escape_html(message).replace('\n', "<br>")
    )
}

/// Group examples by category, categories sorted, original order kept
/// within each category. Uncategorized entries land under "Other".
pub fn group_examples(examples: &[QueryExample]) -> Vec<(String, Vec<QueryExample>)> {
    let mut grouped: BTreeMap<String, Vec<QueryExample>> = BTreeMap::new();
    for example in examples {
        let category = if example.category.is_empty() {
            "Other".to_string()
        } else {
            example.category.clone()
        };
        grouped.entry(category).or_default().push(example.clone());
    }
    grouped.into_iter().collect()
}

/// "2026-08-29T10:42:07.123" -> "2026-08-29 10:42" for the sidebar.
pub fn chat_timestamp(created_at: &str) -> String {
    let trimmed: String = created_at.chars().take(16).collect();
    trimmed.replace('T', " ")
}
