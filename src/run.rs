//! One end-to-end monitor run.
//!
//! [`RunController::run`] always produces exactly one [`RunOutcome`] and one
//! summary message, whichever step fails. Once a browser has been launched it
//! is closed before the summary goes out.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::artifacts::Artifacts;
use crate::auth::{AuthFlow, AuthSettings};
use crate::balance::{BalanceReader, UNAVAILABLE};
use crate::browser::{BrowserLauncher, BrowserSession};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::credentials::Credential;
use crate::error::{RotateError, RunError};
use crate::notify::{escape_html, escape_html_within, Notifier, MAX_MESSAGE_CHARS};
use crate::observer::{RunLog, RunObserver};
use crate::secrets::SecretStore;

const SUMMARY_LOG_LINES: usize = 6;

/// What happened to the session secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    /// The run never got far enough, or no live session cookie was found.
    NotAttempted,
    Rotated,
    /// No token or repository configured.
    NotConfigured,
    Failed(String),
}

/// Result of one run. Produced exactly once.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    /// The balance figure, or [`UNAVAILABLE`].
    pub balance: String,
    /// Latest screenshot taken during the run.
    pub artifact: Option<PathBuf>,
    pub error: Option<String>,
    pub rotation: Rotation,
    pub timestamp: DateTime<Utc>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}

/// State that survives a failed attempt so the report can still show it.
struct Progress {
    balance: Option<String>,
    rotation: Rotation,
}

/// Drives one attempt: login, balance, credential rotation, report.
pub struct RunController {
    config: Config,
    launcher: Arc<dyn BrowserLauncher>,
    notifier: Arc<dyn Notifier>,
    secrets: Arc<dyn SecretStore>,
    balance: Arc<dyn BalanceReader>,
    clock: Arc<dyn Clock>,
}

impl RunController {
    /// Controller with the notifier, secret store and balance reader the
    /// config describes.
    pub fn new(config: Config, launcher: Arc<dyn BrowserLauncher>) -> anyhow::Result<Self> {
        let notifier = config.build_notifier().into();
        let secrets = config.build_secret_store()?.into();
        let balance = Arc::new(config.balance_reader());
        Ok(Self {
            config,
            launcher,
            notifier,
            secrets,
            balance,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_balance_reader(mut self, balance: Arc<dyn BalanceReader>) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run once and report the outcome through the notifier.
    pub async fn run(&self) -> RunOutcome {
        let log = RunLog::new();
        let artifacts = Artifacts::new(&self.config.artifact_dir);
        let mut progress = Progress {
            balance: None,
            rotation: Rotation::NotAttempted,
        };

        log.step("Monitor run started");
        let result = self.attempt(&log, &artifacts, &mut progress).await;

        let outcome = match result {
            Ok(()) => {
                log.success("Run finished");
                RunOutcome {
                    success: true,
                    balance: progress.balance.unwrap_or_else(|| UNAVAILABLE.to_string()),
                    artifact: artifacts.last(),
                    error: None,
                    rotation: progress.rotation,
                    timestamp: self.clock.now(),
                }
            }
            Err(err) => {
                log.error(&format!("Run failed: {err}"));
                RunOutcome {
                    success: false,
                    balance: progress.balance.unwrap_or_else(|| "error".to_string()),
                    artifact: artifacts.last(),
                    error: Some(err.to_string()),
                    rotation: progress.rotation,
                    timestamp: self.clock.now(),
                }
            }
        };

        self.report(&outcome, &log).await;
        outcome
    }

    async fn attempt(
        &self,
        log: &RunLog,
        artifacts: &Artifacts,
        progress: &mut Progress,
    ) -> Result<(), RunError> {
        let cached = self.config.cached_credential();
        self.config.validate(cached.as_ref())?;
        let auth = self.config.auth_settings()?;

        log.step("Launching browser");
        let session = self.launcher.launch().await?;

        let result = self
            .drive(session.as_ref(), &auth, cached.as_ref(), log, artifacts, progress)
            .await;

        if result.is_err() {
            artifacts
                .capture(session.as_ref(), self.clock.as_ref(), "critical_error")
                .await;
        }
        if let Err(err) = session.close().await {
            tracing::warn!(error = %err, "Browser teardown failed");
        }
        result
    }

    async fn drive(
        &self,
        session: &dyn BrowserSession,
        auth: &AuthSettings,
        cached: Option<&Credential>,
        log: &RunLog,
        artifacts: &Artifacts,
        progress: &mut Progress,
    ) -> Result<(), RunError> {
        if let Some(credential) = cached {
            session.set_cookies(&[credential.to_cookie()]).await?;
            log.success("Loaded the saved GitHub session");
        }

        let flow = AuthFlow::new(
            auth,
            self.notifier.as_ref(),
            log,
            self.clock.as_ref(),
            artifacts,
        );
        let report = flow.run(session).await;
        tracing::debug!(
            states = report.trace.len(),
            submissions = report.credential_submissions,
            challenges = report.challenges_issued,
            "Sign-in finished"
        );
        if let Some(failure) = report.failure() {
            return Err(failure.clone().into());
        }

        log.step("Reading the balance");
        let balance = match self.balance.read(session).await {
            Ok(figure) => {
                log.success(&format!("Balance: {figure}"));
                figure.to_string()
            }
            Err(err) => {
                log.warn(&format!("Balance unavailable: {err}"));
                if let Some(shot) = artifacts
                    .capture(session, self.clock.as_ref(), "balance_error")
                    .await
                {
                    self.notifier
                        .attach(&shot, "Balance page at the time of failure")
                        .await;
                }
                UNAVAILABLE.to_string()
            }
        };
        progress.balance = Some(balance);

        let cookies = session.cookies().await?;
        match Credential::from_cookies(&cookies) {
            Some(live) => {
                progress.rotation = self.rotate(&live, log).await;
                self.cache_locally(&live);
            }
            None => log.warn("No live GitHub session cookie; secret not rotated"),
        }

        artifacts
            .capture(session, self.clock.as_ref(), "success_final")
            .await;
        Ok(())
    }

    async fn rotate(&self, credential: &Credential, log: &RunLog) -> Rotation {
        let name = &self.config.session_secret_name;
        let plaintext = secrecy::SecretString::from(credential.expose().to_string());
        match self.secrets.rotate(name, &plaintext).await {
            Ok(()) => {
                log.success(&format!("{name} updated in repository secrets"));
                Rotation::Rotated
            }
            Err(RotateError::NotConfigured) => {
                tracing::info!("Secret store not configured; skipping rotation");
                Rotation::NotConfigured
            }
            Err(err) => {
                log.warn(&format!("Secret not rotated: {err}"));
                Rotation::Failed(err.to_string())
            }
        }
    }

    fn cache_locally(&self, credential: &Credential) {
        let Some(cache) = self.config.session_cache() else {
            return;
        };
        if let Err(err) = cache.store(credential, self.clock.now()) {
            tracing::warn!(error = %err, "Failed to write session cache");
        }
    }

    async fn report(&self, outcome: &RunOutcome, log: &RunLog) {
        let summary = render_summary(
            outcome,
            &self.clock.local_timestamp(self.config.report_timezone),
            &log.recent(SUMMARY_LOG_LINES),
        );
        self.notifier.announce(&summary).await;

        if let Some(shot) = &outcome.artifact {
            let caption = if outcome.success {
                "Final state"
            } else {
                "Error screenshot"
            };
            self.notifier.attach(shot, caption).await;
        }
    }
}

const MAX_DETAILS_CHARS: usize = 1024;

/// HTML summary sent at the end of every run.
pub fn render_summary(outcome: &RunOutcome, local_time: &str, recent_log: &str) -> String {
    let status = if outcome.success {
        "✅ Success"
    } else {
        "❌ Failure"
    };
    let mut message = format!(
        "<b>🤖 ClawCloud monitor</b>\n\n\
         <b>Status:</b> {status}\n\
         <b>Balance:</b> <code>{}</code>\n\
         <b>Time:</b> {}",
        escape_html(&outcome.balance),
        escape_html(local_time),
    );
    if let Some(error) = &outcome.error {
        message.push_str(&format!(
            "\n<b>Details:</b> <code>{}</code>",
            escape_html_within(error, MAX_DETAILS_CHARS)
        ));
    }
    message.push_str("\n\n<b>Log:</b>\n");
    let budget = MAX_MESSAGE_CHARS.saturating_sub(message.chars().count());
    message.push_str(&fit_log(recent_log, budget));
    message
}

/// Escaped log lines, newest kept first, within `budget` characters.
fn fit_log(log: &str, budget: usize) -> String {
    let mut kept: Vec<String> = Vec::new();
    let mut used = 0;
    for line in log.lines().rev() {
        let separator = usize::from(!kept.is_empty());
        let remaining = budget.saturating_sub(used + separator);
        let escaped = escape_html(line);
        let len = escaped.chars().count();
        if len <= remaining {
            used += len + separator;
            kept.push(escaped);
            continue;
        }
        if kept.is_empty() {
            kept.push(escape_html_within(line, remaining));
        }
        break;
    }
    kept.reverse();
    kept.join("\n")
}
