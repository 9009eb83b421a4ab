//! Error types for a monitor run.
//!
//! Fatal failures abort the run and end up in [`RunError`]. Everything else
//! (balance extraction, secret rotation, notification delivery) is degraded
//! into an output value at the step where it happens.

use std::time::Duration;

/// Fatal failures of a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A required setting is absent. Raised before the browser is touched.
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    /// No `/code` reply arrived before the challenge deadline.
    #[error("second-factor timeout after {}s", .0.as_secs())]
    ChallengeTimeout(Duration),

    /// The provider never handed control back to the target site.
    #[error("authentication redirect timeout after {}s", .0.as_secs())]
    RedirectTimeout(Duration),

    /// The provider kept showing its login form after credentials were submitted.
    #[error("identity provider rejected the sign-in")]
    LoginRejected,

    /// Browser launch or page automation failed.
    #[error("browser error: {0:#}")]
    Browser(#[from] anyhow::Error),
}

impl RunError {
    pub fn missing(what: impl Into<String>) -> Self {
        Self::ConfigurationMissing(what.into())
    }
}

/// Why the balance could not be read.
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("billing page did not render {marker:?} within {}s", .timeout.as_secs())]
    NotRendered { marker: String, timeout: Duration },

    #[error("no currency amount found on the billing page")]
    NoFigure,

    #[error("billing page navigation failed: {0:#}")]
    Browser(#[from] anyhow::Error),
}

/// Why a secret was not rotated.
#[derive(Debug, thiserror::Error)]
pub enum RotateError {
    /// Token or repository unset. Expected outside CI.
    #[error("secret store not configured")]
    NotConfigured,

    #[error("failed to fetch repository public key: {0}")]
    PublicKey(String),

    #[error("invalid repository public key: {0}")]
    InvalidKey(String),

    #[error("sealing failed")]
    Seal,

    /// The API refused the sealed value, e.g. because the key id went stale.
    #[error("secret publish rejected ({status})")]
    Rejected { status: u16 },

    #[error("secret publish failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Delivery failure of an outbound message. Never leaves the notifier.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("messaging API returned {status}: {description}")]
    Api { status: u16, description: String },

    #[error("messaging request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to read attachment: {0}")]
    Io(#[from] std::io::Error),
}
