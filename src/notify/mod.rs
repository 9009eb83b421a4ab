//! Operator messaging.
//!
//! Outbound messages are best-effort: a messaging outage must never abort a
//! run, so nothing here returns an error to the caller.

mod telegram;

pub use telegram::TelegramNotifier;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

/// Channel to the operator: status messages, screenshots and second-factor codes.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message. Failures are logged and swallowed.
    async fn announce(&self, message: &str);

    /// Send an image with a caption. No-op if the file does not exist.
    async fn attach(&self, image: &Path, caption: &str);

    /// Wait up to `timeout` for a `/code <digits>` reply from the operator.
    async fn await_code(&self, timeout: Duration) -> Option<String>;
}

/// Notifier used when no messaging channel is configured.
#[derive(Debug, Clone, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn announce(&self, _message: &str) {}

    async fn attach(&self, _image: &Path, _caption: &str) {}

    async fn await_code(&self, _timeout: Duration) -> Option<String> {
        tracing::warn!("No messaging channel configured; cannot receive a second-factor code");
        None
    }
}

/// Longest message Telegram accepts.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape `text`, shortening it with a trailing `…` so the escaped form fits in
/// `max_chars`. Cuts fall between characters, never inside an entity.
pub fn escape_html_within(text: &str, max_chars: usize) -> String {
    let escaped = escape_html(text);
    if escaped.chars().count() <= max_chars {
        return escaped;
    }
    if max_chars == 0 {
        return String::new();
    }

    let budget = max_chars - 1;
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let unit = escape_html(c.encode_utf8(&mut [0; 4]));
        let len = unit.chars().count();
        if used + len > budget {
            break;
        }
        used += len;
        out.push_str(&unit);
    }
    out.push('…');
    out
}
