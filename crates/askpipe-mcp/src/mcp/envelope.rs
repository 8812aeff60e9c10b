use askpipe_core::{Error, NO_RESULTS_PLACEHOLDER};
use rmcp::model::{CallToolResult, Content};

/// Wrap backend text into the tool response envelope. Empty text gets the
/// placeholder so clients never see a blank result.
pub(crate) fn text_result(text: String) -> CallToolResult {
    let text = if text.trim().is_empty() {
        NO_RESULTS_PLACEHOLDER.to_string()
    } else {
        text
    };
    CallToolResult::success(vec![Content::text(text)])
}

/// Map a backend failure into the error envelope. `context` reads like
/// "searching felo" so the message becomes "Error searching felo: …".
pub(crate) fn error_result(context: &str, err: &Error) -> CallToolResult {
    tracing::warn!(code = error_code(err), context, error = %err, "tool call failed");
    CallToolResult::error(vec![Content::text(format!("Error {context}: {err}"))])
}

/// Stable short code per error class, for log lines.
pub(crate) fn error_code(err: &Error) -> &'static str {
    match err {
        Error::Validation(_) => "invalid_params",
        Error::Transport(_) => "transport_failed",
        Error::Protocol(_) => "protocol_mismatch",
        Error::RateLimit(_) => "rate_limited",
    }
}
