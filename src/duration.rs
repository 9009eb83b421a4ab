//! Timeout parsing for environment settings like `TWO_FACTOR_WAIT=120` or `REDIRECT_TIMEOUT=40s`.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;

/// Longest timeout any setting may ask for.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Parse a timeout string.
///
/// A bare number is taken as seconds, which keeps `TWO_FACTOR_WAIT=120`
/// working. Otherwise the value must end in one of:
/// - `h` - hours
/// - `m` - minutes
/// - `s` - seconds
///
/// Values above [`MAX_TIMEOUT`] are rejected.
///
/// # Examples
///
/// ```
/// use clawmon::duration::parse_timeout;
/// use std::time::Duration;
///
/// assert_eq!(parse_timeout("120").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_timeout("2m").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_timeout("40s").unwrap(), Duration::from_secs(40));
/// ```
pub fn parse_timeout(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        anyhow::bail!("Timeout is empty");
    }

    let (num, multiplier) = match s.chars().last() {
        Some('h') => (&s[..s.len() - 1], 60 * 60),
        Some('m') => (&s[..s.len() - 1], 60),
        Some('s') => (&s[..s.len() - 1], 1),
        Some(c) if c.is_ascii_digit() => (s.as_str(), 1),
        _ => anyhow::bail!("Timeout must be a number of seconds or end with h, m, or s"),
    };

    let num: u64 = num
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in timeout {s:?}"))?;
    let secs = num.checked_mul(multiplier).context("Timeout is too large")?;
    let timeout = Duration::from_secs(secs);
    if timeout > MAX_TIMEOUT {
        anyhow::bail!(
            "Timeout {s:?} exceeds the maximum of {}",
            format_timeout(MAX_TIMEOUT)
        );
    }

    Ok(timeout)
}

/// The instant `timeout` from now, with `timeout` capped at [`MAX_TIMEOUT`].
pub fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(MAX_TIMEOUT)
}

/// Format a timeout for log and chat messages, using the largest unit that divides evenly.
///
/// ```
/// use clawmon::duration::format_timeout;
/// use std::time::Duration;
///
/// assert_eq!(format_timeout(Duration::from_secs(120)), "2m");
/// assert_eq!(format_timeout(Duration::from_secs(90)), "90s");
/// ```
pub fn format_timeout(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
