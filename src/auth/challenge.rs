//! Second-factor challenges relayed through the operator chat.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;

use crate::duration::deadline_after;
use crate::notify::Notifier;

/// Full-message grammar of the operator reply: `/code` then 6 to 8 ASCII digits.
static CODE_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/code\s+([0-9]{6,8})$").expect("valid code regex"));

/// Extract the digits from a `/code 123456` message.
///
/// The whole message must match; anything else returns `None`.
pub fn parse_code_command(text: &str) -> Option<String> {
    CODE_COMMAND
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// An outstanding second-factor prompt.
///
/// Resolving or expiring consumes the request, so a challenge can never be
/// answered twice.
#[derive(Debug)]
pub struct ChallengeRequest {
    timeout: Duration,
    deadline: Instant,
}

/// How a challenge ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeResolution {
    Code(String),
    Expired,
}

impl ChallengeRequest {
    pub fn issue(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: deadline_after(timeout),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Operator-facing prompt text (HTML).
    pub fn prompt(&self) -> String {
        format!(
            "🔐 <b>Two-factor authentication required</b>\n\n\
             Reply in this chat within {}:\n<code>/code XXXXXX</code>",
            crate::duration::format_timeout(self.timeout)
        )
    }

    /// Wait on `channel` for a code until the deadline.
    ///
    /// The channel gets the remaining budget, and the wait is also cut off at
    /// the deadline here so a slow transport cannot stretch it.
    pub async fn resolve(self, channel: &dyn Notifier) -> ChallengeResolution {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let code = tokio::time::timeout_at(self.deadline, channel.await_code(remaining))
            .await
            .ok()
            .flatten();

        // A transport that hands back something other than digits is treated as no reply.
        match code {
            Some(code) if is_code(&code) => ChallengeResolution::Code(code),
            _ => ChallengeResolution::Expired,
        }
    }
}

fn is_code(code: &str) -> bool {
    (6..=8).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_digit())
}
