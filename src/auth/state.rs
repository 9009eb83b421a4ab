//! States, observations and the pure transition function of the login flow.

use std::time::Duration;

use regex::Regex;
use reqwest::Url;

use crate::error::RunError;

const PROVIDER_HOST: &str = "github.com";

/// Where the browser currently is, as far as the login flow cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// The target site's sign-in surface.
    SignIn,
    /// Any other page on the target site.
    Target,
    /// The provider's username/password form.
    ProviderLogin,
    /// The provider's second-factor prompt.
    ProviderTwoFactor,
    /// Any other provider page (e.g. the OAuth authorize screen).
    Provider,
    /// Anything else, including unparsable URLs.
    Elsewhere,
}

/// URL layout of the target site and the identity provider.
#[derive(Debug, Clone)]
pub struct Routes {
    target_domain: String,
    signin_path: String,
}

impl Routes {
    /// Routes for a target reachable under `target_domain` (and its subdomains).
    pub fn new(target_domain: impl Into<String>, signin_path: impl Into<String>) -> Self {
        Self {
            target_domain: target_domain.into().to_ascii_lowercase(),
            signin_path: signin_path.into(),
        }
    }

    pub fn target_domain(&self) -> &str {
        &self.target_domain
    }

    /// Pattern matching any URL on the target domain.
    pub fn target_pattern(&self) -> Regex {
        let domain = regex::escape(&self.target_domain);
        Regex::new(&format!(r"^https?://([^/?#]+\.)?{domain}(:\d+)?([/?#]|$)"))
            .expect("escaped domain forms a valid regex")
    }

    pub fn classify(&self, url: &str) -> Location {
        let Ok(url) = Url::parse(url) else {
            return Location::Elsewhere;
        };
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return Location::Elsewhere;
        };
        let path = url.path();

        if host_matches(&host, &self.target_domain) {
            if path.starts_with(&self.signin_path) {
                Location::SignIn
            } else {
                Location::Target
            }
        } else if host_matches(&host, PROVIDER_HOST) {
            if path.contains("two-factor") {
                Location::ProviderTwoFactor
            } else if path.starts_with("/login/oauth") {
                Location::Provider
            } else if path == "/login" || path.starts_with("/login/") || path == "/session" {
                Location::ProviderLogin
            } else {
                Location::Provider
            }
        } else {
            Location::Elsewhere
        }
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Why the flow stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    MissingCredentials,
    LoginRejected,
    ChallengeTimeout(Duration),
    RedirectTimeout(Duration),
    Browser(String),
    /// An observation that the current state cannot produce.
    Unexpected(&'static str),
}

impl From<AuthFailure> for RunError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::MissingCredentials => {
                RunError::missing("GH_USERNAME and GH_PASSWORD are required to sign in")
            }
            AuthFailure::LoginRejected => RunError::LoginRejected,
            AuthFailure::ChallengeTimeout(after) => RunError::ChallengeTimeout(after),
            AuthFailure::RedirectTimeout(after) => RunError::RedirectTimeout(after),
            AuthFailure::Browser(message) => RunError::Browser(anyhow::anyhow!(message)),
            AuthFailure::Unexpected(state) => {
                RunError::Browser(anyhow::anyhow!("login flow stalled in state {state}"))
            }
        }
    }
}

/// Login flow states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Start,
    ProviderRedirect,
    CredentialEntry,
    ChallengePending,
    ConsentPending,
    /// Bounded wait for the provider to hand control back to the target.
    AwaitingRedirect,
    Authenticated,
    Done,
    Failed(AuthFailure),
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Start => "Start",
            AuthState::ProviderRedirect => "ProviderRedirect",
            AuthState::CredentialEntry => "CredentialEntry",
            AuthState::ChallengePending => "ChallengePending",
            AuthState::ConsentPending => "ConsentPending",
            AuthState::AwaitingRedirect => "AwaitingRedirect",
            AuthState::Authenticated => "Authenticated",
            AuthState::Done => "Done",
            AuthState::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Done | AuthState::Failed(_))
    }
}

/// What the page looked like after a state's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageView {
    pub location: Location,
    /// The provider is asking to authorize the target site.
    pub consent_prompt: bool,
}

/// Result of performing one state's action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Page(PageView),
    ChallengeExpired(Duration),
    Redirect { confirmed: bool, waited: Duration },
    /// The state has no action.
    Idle,
}

/// The transition function.
///
/// Challenge and consent are checked independently: a challenge page always
/// wins first, and the consent prompt is looked for again after the code is
/// accepted.
pub fn transition(state: &AuthState, observation: &Observation) -> AuthState {
    use AuthState::*;
    use Location::*;

    match (state, observation) {
        (Start, Observation::Page(view)) => match view.location {
            SignIn | ProviderLogin | ProviderTwoFactor | Provider => ProviderRedirect,
            // The target honored an existing session.
            Target | Elsewhere => AwaitingRedirect,
        },

        (ProviderRedirect, Observation::Page(view)) => match view.location {
            ProviderLogin => CredentialEntry,
            ProviderTwoFactor => ChallengePending,
            _ if view.consent_prompt => ConsentPending,
            // The provider honored the cached session cookie.
            _ => AwaitingRedirect,
        },

        (CredentialEntry, Observation::Page(view)) => match view.location {
            ProviderTwoFactor => ChallengePending,
            _ if view.consent_prompt => ConsentPending,
            ProviderLogin => Failed(AuthFailure::LoginRejected),
            _ => AwaitingRedirect,
        },

        (ChallengePending, Observation::ChallengeExpired(after)) => {
            Failed(AuthFailure::ChallengeTimeout(*after))
        }
        (ChallengePending, Observation::Page(view)) => {
            if view.consent_prompt {
                ConsentPending
            } else {
                AwaitingRedirect
            }
        }

        (ConsentPending, Observation::Page(_)) => AwaitingRedirect,

        (AwaitingRedirect, Observation::Redirect { confirmed, waited }) => {
            if *confirmed {
                Authenticated
            } else {
                Failed(AuthFailure::RedirectTimeout(*waited))
            }
        }

        (Authenticated, _) => Done,

        (Done, _) => Done,
        (Failed(failure), _) => Failed(failure.clone()),

        (state, _) => Failed(AuthFailure::Unexpected(state.name())),
    }
}
