//! Best-effort extraction of the account balance from the billing page.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::browser::BrowserSession;
use crate::error::BalanceError;

/// Reported in place of a figure when extraction fails.
pub const UNAVAILABLE: &str = "unavailable (see screenshot)";

/// Text that only appears once the billing widgets have rendered.
pub const READY_MARKER: &str = "Credits Available";

const SNIPPET_SELECTOR: &str = "div, span, p";
const DEFAULT_USAGE: &str = "0/5 used";

static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\d+\.\d+$").expect("valid amount regex"));

/// A balance as shown on the billing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceFigure {
    pub amount: String,
    pub usage: String,
}

impl std::fmt::Display for BalanceFigure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.amount, self.usage)
    }
}

/// Reads the balance from an authenticated session. Must not change account state.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    async fn read(&self, session: &dyn BrowserSession) -> Result<BalanceFigure, BalanceError>;
}

/// Reads `<base>/plan` and picks the first bare dollar amount.
#[derive(Debug, Clone)]
pub struct PlanPageReader {
    base_url: String,
    navigation_timeout: Duration,
    render_timeout: Duration,
}

impl PlanPageReader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            navigation_timeout: Duration::from_secs(60),
            render_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_timeouts(mut self, navigation: Duration, render: Duration) -> Self {
        self.navigation_timeout = navigation;
        self.render_timeout = render;
        self
    }

    pub fn plan_url(&self) -> String {
        format!("{}/plan", self.base_url)
    }
}

#[async_trait]
impl BalanceReader for PlanPageReader {
    async fn read(&self, session: &dyn BrowserSession) -> Result<BalanceFigure, BalanceError> {
        session
            .goto(&self.plan_url(), self.navigation_timeout)
            .await?;

        if !session.wait_for_text(READY_MARKER, self.render_timeout).await? {
            return Err(BalanceError::NotRendered {
                marker: READY_MARKER.to_string(),
                timeout: self.render_timeout,
            });
        }

        let snippets = session.text_snippets(SNIPPET_SELECTOR).await?;
        tracing::debug!(count = snippets.len(), "Scanning billing page text");
        parse_figure(&snippets).ok_or(BalanceError::NoFigure)
    }
}

/// Pick the amount and usage line out of the page's text blocks.
pub fn parse_figure<S: AsRef<str>>(snippets: &[S]) -> Option<BalanceFigure> {
    let amount = snippets
        .iter()
        .map(|s| s.as_ref().trim())
        .find(|s| AMOUNT_RE.is_match(s))?;

    let usage = snippets
        .iter()
        .map(|s| s.as_ref().trim())
        .find(|s| !s.is_empty() && s.contains("used"))
        .unwrap_or(DEFAULT_USAGE);

    Some(BalanceFigure {
        amount: amount.to_string(),
        usage: usage.to_string(),
    })
}
