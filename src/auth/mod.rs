//! Sign-in to the target site through the GitHub identity provider.
//!
//! [`AuthFlow`] drives the browser one state at a time: each state performs a
//! single action, the resulting page is summarized as an [`Observation`], and
//! [`transition`] picks the next state. The flow never retries; a failed login
//! is retried by running the monitor again.

mod challenge;
mod state;

pub use challenge::{parse_code_command, ChallengeRequest, ChallengeResolution};
pub use state::{
    transition, AuthFailure, AuthState, Location, Observation, PageView, Routes,
};

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;

use crate::artifacts::Artifacts;
use crate::browser::{BrowserSession, Locator};
use crate::clock::Clock;
use crate::duration::deadline_after;
use crate::notify::Notifier;
use crate::observer::RunObserver;

pub const LOGIN_INPUT: &str = r#"input[name="login"]"#;
pub const PASSWORD_INPUT: &str = r#"input[name="password"]"#;
pub const SUBMIT_BUTTON: &str = r#"input[type="submit"]"#;
pub const OTP_INPUT: &str = r#"input[autocomplete="one-time-code"]"#;
pub const AUTHORIZE_BUTTON: &str = r#"button[name="authorize"]"#;

/// The "continue with GitHub" control on the target's sign-in page.
pub fn provider_button() -> Locator {
    Locator::text("button", "GitHub")
}

pub fn consent_control() -> Locator {
    Locator::css(AUTHORIZE_BUTTON)
}

const MAX_STEPS: usize = 16;
const REDIRECT_POLL: Duration = Duration::from_millis(250);

/// Everything the login flow needs to know up front.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub signin_url: String,
    pub routes: Routes,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub navigation_timeout: Duration,
    pub settle_timeout: Duration,
    pub redirect_timeout: Duration,
    pub challenge_timeout: Duration,
}

/// What happened during one login attempt.
#[derive(Debug, Clone, Default)]
pub struct AuthReport {
    /// Every state entered, in order, starting with `Start`.
    pub trace: Vec<AuthState>,
    /// Times the username/password form was submitted.
    pub credential_submissions: u32,
    /// Second-factor challenges issued.
    pub challenges_issued: u32,
}

impl AuthReport {
    pub fn final_state(&self) -> &AuthState {
        self.trace.last().unwrap_or(&AuthState::Start)
    }

    pub fn failure(&self) -> Option<&AuthFailure> {
        match self.final_state() {
            AuthState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn visited(&self, state: &AuthState) -> bool {
        self.trace.contains(state)
    }

    /// Index of `state` in the trace.
    pub fn position(&self, state: &AuthState) -> Option<usize> {
        self.trace.iter().position(|s| s == state)
    }
}

fn browser_failure(err: anyhow::Error) -> AuthFailure {
    AuthFailure::Browser(format!("{err:#}"))
}

/// One login attempt against a browser session.
pub struct AuthFlow<'a> {
    settings: &'a AuthSettings,
    notifier: &'a dyn Notifier,
    observer: &'a dyn RunObserver,
    clock: &'a dyn Clock,
    artifacts: &'a Artifacts,
}

impl<'a> AuthFlow<'a> {
    pub fn new(
        settings: &'a AuthSettings,
        notifier: &'a dyn Notifier,
        observer: &'a dyn RunObserver,
        clock: &'a dyn Clock,
        artifacts: &'a Artifacts,
    ) -> Self {
        Self {
            settings,
            notifier,
            observer,
            clock,
            artifacts,
        }
    }

    /// Drive the flow to `Done` or `Failed`.
    pub async fn run(&self, session: &dyn BrowserSession) -> AuthReport {
        let mut report = AuthReport::default();
        let mut state = AuthState::Start;
        report.trace.push(state.clone());

        while !state.is_terminal() {
            let next = if report.trace.len() > MAX_STEPS {
                AuthState::Failed(AuthFailure::Unexpected(state.name()))
            } else {
                match self.act(&state, session, &mut report).await {
                    Ok(observation) => transition(&state, &observation),
                    Err(failure) => AuthState::Failed(failure),
                }
            };
            tracing::debug!(from = state.name(), to = next.name(), "Auth transition");
            state = next;
            report.trace.push(state.clone());
        }

        if let AuthState::Failed(failure) = &state {
            tracing::warn!(?failure, "Sign-in failed");
        }
        report
    }

    async fn act(
        &self,
        state: &AuthState,
        session: &dyn BrowserSession,
        report: &mut AuthReport,
    ) -> Result<Observation, AuthFailure> {
        match state {
            AuthState::Start => {
                self.observer.step("Opening the sign-in page");
                session
                    .goto(&self.settings.signin_url, self.settings.navigation_timeout)
                    .await
                    .map_err(browser_failure)?;
                self.observe(session).await
            }
            AuthState::ProviderRedirect => {
                let button = provider_button();
                if session.is_present(&button).await.map_err(browser_failure)? {
                    self.observer.info("Sign-in required; continuing with GitHub");
                    session.click(&button).await.map_err(browser_failure)?;
                    self.settle(session).await?;
                }
                self.observe(session).await
            }
            AuthState::CredentialEntry => self.submit_credentials(session, report).await,
            AuthState::ChallengePending => self.resolve_challenge(session, report).await,
            AuthState::ConsentPending => {
                let control = consent_control();
                if session.is_present(&control).await.map_err(browser_failure)? {
                    self.observer.step("Authorizing the application");
                    session.click(&control).await.map_err(browser_failure)?;
                    self.settle(session).await?;
                }
                self.observe(session).await
            }
            AuthState::AwaitingRedirect => self.await_redirect(session).await,
            AuthState::Authenticated => {
                self.observer.success("Signed in");
                Ok(Observation::Idle)
            }
            AuthState::Done | AuthState::Failed(_) => Ok(Observation::Idle),
        }
    }

    async fn observe(&self, session: &dyn BrowserSession) -> Result<Observation, AuthFailure> {
        let url = session.location().await.map_err(browser_failure)?;
        let location = self.settings.routes.classify(&url);
        let consent_prompt = match location {
            Location::ProviderLogin | Location::ProviderTwoFactor | Location::Provider => session
                .is_present(&consent_control())
                .await
                .map_err(browser_failure)?,
            _ => false,
        };
        tracing::debug!(?location, consent_prompt, "Observed page");
        Ok(Observation::Page(PageView {
            location,
            consent_prompt,
        }))
    }

    async fn settle(&self, session: &dyn BrowserSession) -> Result<(), AuthFailure> {
        session
            .settle(self.settings.settle_timeout)
            .await
            .map_err(browser_failure)
    }

    async fn submit_credentials(
        &self,
        session: &dyn BrowserSession,
        report: &mut AuthReport,
    ) -> Result<Observation, AuthFailure> {
        let (Some(username), Some(password)) = (&self.settings.username, &self.settings.password)
        else {
            return Err(AuthFailure::MissingCredentials);
        };

        self.observer.step("Signing in to GitHub");
        session
            .fill(LOGIN_INPUT, username)
            .await
            .map_err(browser_failure)?;
        session
            .fill(PASSWORD_INPUT, password.expose_secret())
            .await
            .map_err(browser_failure)?;
        report.credential_submissions += 1;
        session
            .click(&Locator::css(SUBMIT_BUTTON))
            .await
            .map_err(browser_failure)?;
        self.settle(session).await?;
        self.observe(session).await
    }

    async fn resolve_challenge(
        &self,
        session: &dyn BrowserSession,
        report: &mut AuthReport,
    ) -> Result<Observation, AuthFailure> {
        report.challenges_issued += 1;
        let request = ChallengeRequest::issue(self.settings.challenge_timeout);
        let timeout = request.timeout();
        self.observer
            .info("Second factor required; waiting for /code in Telegram");

        let shot = self
            .artifacts
            .capture(session, self.clock, "2fa_required")
            .await;
        self.notifier.announce(&request.prompt()).await;
        if let Some(shot) = shot {
            self.notifier.attach(&shot, "Second-factor prompt").await;
        }

        match request.resolve(self.notifier).await {
            ChallengeResolution::Expired => {
                self.observer.error("No second-factor code received in time");
                Ok(Observation::ChallengeExpired(timeout))
            }
            ChallengeResolution::Code(code) => {
                self.observer.success("Second-factor code received; submitting");
                session
                    .fill(OTP_INPUT, &code)
                    .await
                    .map_err(browser_failure)?;
                session
                    .press_key(OTP_INPUT, "Enter")
                    .await
                    .map_err(browser_failure)?;
                self.settle(session).await?;
                self.observe(session).await
            }
        }
    }

    /// Bounded wait for a non-sign-in page on the target domain.
    async fn await_redirect(&self, session: &dyn BrowserSession) -> Result<Observation, AuthFailure> {
        let timeout = self.settings.redirect_timeout;
        let pattern = self.settings.routes.target_pattern();
        let deadline = deadline_after(timeout);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let matched = session
                .wait_for_url(&pattern, remaining)
                .await
                .map_err(browser_failure)?;
            if matched {
                let url = session.location().await.map_err(browser_failure)?;
                if self.settings.routes.classify(&url) == Location::Target {
                    return Ok(Observation::Redirect {
                        confirmed: true,
                        waited: timeout,
                    });
                }
            }
            if !matched || Instant::now() >= deadline {
                return Ok(Observation::Redirect {
                    confirmed: false,
                    waited: timeout,
                });
            }
            tokio::time::sleep(REDIRECT_POLL.min(remaining)).await;
        }
    }
}
