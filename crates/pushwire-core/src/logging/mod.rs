//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the compact stderr subscriber used by the binary
//! - [`redact_token`] shortens device tokens before they reach a log line
//! - [`test_utils::capture_logs`] records events in memory for assertions

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Characters of a device token kept by [`redact_token`].
pub const REDACTED_TOKEN_PREFIX: usize = 8;

/// Initialize the global tracing subscriber with stderr output.
///
/// `RUST_LOG` wins over `level` when set. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Shorten a device token to its first few characters.
pub fn redact_token(token: &str) -> String {
    match token.char_indices().nth(REDACTED_TOKEN_PREFIX) {
        Some((cut, _)) => format!("{}...", &token[..cut]),
        None => token.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_is_idempotent() {
        init_subscriber("warn");
        init_subscriber("debug");
    }

    #[test]
    fn redacts_long_tokens() {
        assert_eq!(
            redact_token("ce8be6272e43e85516033e24b4c289220eeda4879c477160b2545e95b68b5969"),
            "ce8be627..."
        );
    }

    #[test]
    fn short_tokens_pass_through() {
        assert_eq!(redact_token("abcd"), "abcd");
        assert_eq!(redact_token("12345678"), "12345678");
    }
}
