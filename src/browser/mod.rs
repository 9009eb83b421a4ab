//! Browser session boundary.
//!
//! The auth flow and the balance reader only talk to a [`BrowserSession`].
//! The production implementation drives headless Chromium over the DevTools
//! protocol (feature `chromium`); tests plug in a scripted fake.

#[cfg(feature = "chromium")]
mod chromium;

#[cfg(feature = "chromium")]
pub use chromium::{find_chrome, ChromiumLauncher, ChromiumSession};

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

/// A browser cookie, reduced to what the session handling needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// How to find a control on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A CSS selector.
    Css(String),
    /// An element with the given tag whose visible text contains `text`.
    Text { tag: String, text: String },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn text(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Locator::Text {
            tag: tag.into(),
            text: text.into(),
        }
    }

    /// XPath equivalent, used for text matching.
    pub fn to_xpath(&self) -> Option<String> {
        match self {
            Locator::Css(_) => None,
            Locator::Text { tag, text } => Some(format!(
                "//{tag}[contains(normalize-space(.), {})]",
                xpath_literal(text)
            )),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "{selector}"),
            Locator::Text { tag, text } => write!(f, "{tag}:has-text({text:?})"),
        }
    }
}

fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{text}'")
    } else if !text.contains('"') {
        format!("\"{text}\"")
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// One open browser page with its context.
///
/// Every method is a suspension point; waits take an explicit timeout.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and wait until the page has settled, bounded by `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Current page URL.
    async fn location(&self) -> Result<String>;

    /// Type `value` into the input matched by `selector`.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Click the first element matched by `target`.
    async fn click(&self, target: &Locator) -> Result<()>;

    /// Whether `target` currently exists on the page.
    async fn is_present(&self, target: &Locator) -> Result<bool>;

    /// Press a key (e.g. `"Enter"`) with focus in the element matched by `selector`.
    async fn press_key(&self, selector: &str, key: &str) -> Result<()>;

    /// Wait for a pending navigation to finish. Returning early on timeout is not an error.
    async fn settle(&self, timeout: Duration) -> Result<()>;

    /// Wait until the URL matches `pattern`. `Ok(false)` on timeout.
    async fn wait_for_url(&self, pattern: &Regex, timeout: Duration) -> Result<bool>;

    /// Wait until `text` is visible in the page body. `Ok(false)` on timeout.
    async fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<bool>;

    async fn cookies(&self) -> Result<Vec<Cookie>>;

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()>;

    /// Full-page PNG screenshot written to `path`.
    async fn screenshot(&self, path: &Path) -> Result<()>;

    /// Read-only DOM query: trimmed `innerText` of every element matched by `selector`.
    async fn text_snippets(&self, selector: &str) -> Result<Vec<String>>;

    /// Release the browser. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Starts browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}
