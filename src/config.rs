//! Run configuration, read from the environment.
//!
//! A `.env` file in the working directory is loaded first when present.
//! Variables that are set but empty count as unset. Values that cannot be
//! parsed fall back to their defaults and are reported by [`Config::validate`],
//! so a bad setting still ends in a run summary.

use std::cell::RefCell;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use reqwest::Url;
use secrecy::SecretString;

use crate::auth::{AuthSettings, Routes};
use crate::balance::PlanPageReader;
use crate::credentials::{Credential, SessionCache};
use crate::duration::parse_timeout;
use crate::error::RunError;
use crate::notify::{Notifier, NullNotifier, TelegramNotifier};
use crate::secrets::{GithubSecretStore, SecretStore};

pub const DEFAULT_BASE_URL: &str = "https://ap-southeast-1.run.claw.cloud";
pub const DEFAULT_SECRET_NAME: &str = "GH_SESSION";
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Shanghai;

const DEFAULT_GITHUB_API: &str = "https://api.github.com";
const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";
const SIGNIN_PATH: &str = "/signin";

const DEFAULT_CHALLENGE_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_REDIRECT_TIMEOUT: Duration = Duration::from_secs(40);
const DEFAULT_BALANCE_TIMEOUT: Duration = Duration::from_secs(20);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything one run needs, resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target console base URL, without a trailing slash.
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Session credential carried over from a previous run.
    pub session: Option<Credential>,

    pub telegram_token: Option<SecretString>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api_url: String,

    pub repo_token: Option<SecretString>,
    /// `owner/name` of the repository holding the session secret.
    pub repository: Option<String>,
    pub github_api_url: String,
    pub session_secret_name: String,

    /// Where screenshots are written.
    pub artifact_dir: PathBuf,
    /// Optional on-disk copy of the session credential.
    pub session_cache_dir: Option<PathBuf>,
    pub report_timezone: Tz,

    pub challenge_timeout: Duration,
    pub navigation_timeout: Duration,
    pub redirect_timeout: Duration,
    pub balance_timeout: Duration,

    pub chrome_path: Option<PathBuf>,

    /// `KEY: reason` for every setting that was present but unparsable.
    pub invalid: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: None,
            password: None,
            session: None,
            telegram_token: None,
            telegram_chat_id: None,
            telegram_api_url: DEFAULT_TELEGRAM_API.to_string(),
            repo_token: None,
            repository: None,
            github_api_url: DEFAULT_GITHUB_API.to_string(),
            session_secret_name: DEFAULT_SECRET_NAME.to_string(),
            artifact_dir: PathBuf::from("."),
            session_cache_dir: None,
            report_timezone: DEFAULT_TIMEZONE,
            challenge_timeout: DEFAULT_CHALLENGE_TIMEOUT,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            redirect_timeout: DEFAULT_REDIRECT_TIMEOUT,
            balance_timeout: DEFAULT_BALANCE_TIMEOUT,
            chrome_path: None,
            invalid: Vec::new(),
        }
    }
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => tracing::warn!(error = %err, "Ignoring unreadable .env"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let invalid = RefCell::new(Vec::new());
        let timeout = |key: &str, default: Duration| match get(key) {
            Some(raw) => parse_timeout(&raw).unwrap_or_else(|e| {
                invalid.borrow_mut().push(format!("{key}: {e}"));
                default
            }),
            None => default,
        };

        let defaults = Self::default();
        let report_timezone = match get("REPORT_TIMEZONE") {
            Some(raw) => Tz::from_str(&raw).unwrap_or_else(|_| {
                invalid
                    .borrow_mut()
                    .push(format!("REPORT_TIMEZONE: unknown zone {raw:?}"));
                defaults.report_timezone
            }),
            None => defaults.report_timezone,
        };
        let challenge_timeout = timeout("TWO_FACTOR_WAIT", DEFAULT_CHALLENGE_TIMEOUT);
        let navigation_timeout = timeout("NAVIGATION_TIMEOUT", DEFAULT_NAVIGATION_TIMEOUT);
        let redirect_timeout = timeout("REDIRECT_TIMEOUT", DEFAULT_REDIRECT_TIMEOUT);
        let balance_timeout = timeout("BALANCE_TIMEOUT", DEFAULT_BALANCE_TIMEOUT);

        Self {
            base_url: get("CLAW_CLOUD_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            username: get("GH_USERNAME"),
            password: get("GH_PASSWORD").map(SecretString::from),
            session: get("GH_SESSION").and_then(Credential::new),
            telegram_token: get("TG_BOT_TOKEN").map(SecretString::from),
            telegram_chat_id: get("TG_CHAT_ID"),
            telegram_api_url: get("TELEGRAM_API_URL").unwrap_or(defaults.telegram_api_url),
            repo_token: get("REPO_TOKEN").map(SecretString::from),
            repository: get("GITHUB_REPOSITORY"),
            github_api_url: get("GITHUB_API_URL").unwrap_or(defaults.github_api_url),
            session_secret_name: get("SESSION_SECRET_NAME")
                .unwrap_or(defaults.session_secret_name),
            artifact_dir: get("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_dir),
            session_cache_dir: get("SESSION_CACHE_DIR").map(PathBuf::from),
            report_timezone,
            challenge_timeout,
            navigation_timeout,
            redirect_timeout,
            balance_timeout,
            chrome_path: get("CHROME_PATH").map(PathBuf::from),
            invalid: invalid.into_inner(),
        }
    }

    /// Fail fast on settings without which no login can succeed.
    ///
    /// `cached` is the credential the run would inject, if any.
    pub fn validate(&self, cached: Option<&Credential>) -> Result<(), RunError> {
        if !self.invalid.is_empty() {
            return Err(RunError::ConfigurationMissing(self.invalid.join("; ")));
        }
        self.target_routes()?;
        let has_login = self.username.is_some() && self.password.is_some();
        if !has_login && cached.is_none() {
            return Err(RunError::missing(
                "GH_USERNAME/GH_PASSWORD or a cached GH_SESSION",
            ));
        }
        Ok(())
    }

    pub fn signin_url(&self) -> String {
        format!("{}{SIGNIN_PATH}", self.base_url)
    }

    /// Routes for the configured console. Subdomains of the console's
    /// registrable domain count as the target site.
    pub fn target_routes(&self) -> Result<Routes, RunError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| RunError::ConfigurationMissing(format!("CLAW_CLOUD_URL: {e}")))?;
        let Some(host) = url.host_str() else {
            return Err(RunError::missing("CLAW_CLOUD_URL: no host"));
        };
        let domain = if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
            host.to_string()
        } else {
            registrable_domain(host)
        };
        Ok(Routes::new(domain, SIGNIN_PATH))
    }

    pub fn auth_settings(&self) -> Result<AuthSettings, RunError> {
        Ok(AuthSettings {
            signin_url: self.signin_url(),
            routes: self.target_routes()?,
            username: self.username.clone(),
            password: self.password.clone(),
            navigation_timeout: self.navigation_timeout,
            settle_timeout: SETTLE_TIMEOUT,
            redirect_timeout: self.redirect_timeout,
            challenge_timeout: self.challenge_timeout,
        })
    }

    pub fn balance_reader(&self) -> PlanPageReader {
        PlanPageReader::new(&self.base_url)
            .with_timeouts(self.navigation_timeout, self.balance_timeout)
    }

    pub fn session_cache(&self) -> Option<SessionCache> {
        let dir = self.session_cache_dir.as_ref()?;
        match SessionCache::with_path(dir) {
            Ok(cache) => Some(cache),
            Err(err) => {
                tracing::warn!(error = %err, "Session cache unavailable");
                None
            }
        }
    }

    /// The credential to inject: `GH_SESSION` first, then the local cache.
    pub fn cached_credential(&self) -> Option<Credential> {
        if let Some(session) = &self.session {
            return Some(session.clone());
        }
        let cache = self.session_cache()?;
        match cache.load() {
            Ok(credential) => credential,
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring unreadable session cache");
                None
            }
        }
    }

    /// Telegram when both bot token and chat are set, otherwise a silent notifier.
    pub fn build_notifier(&self) -> Box<dyn Notifier> {
        match (&self.telegram_token, &self.telegram_chat_id) {
            (Some(token), Some(chat_id)) => Box::new(
                TelegramNotifier::new(token.clone(), chat_id.clone())
                    .with_api_base(&self.telegram_api_url),
            ),
            _ => {
                tracing::info!("Telegram not configured; notifications disabled");
                Box::new(NullNotifier)
            }
        }
    }

    pub fn build_secret_store(&self) -> anyhow::Result<Box<dyn SecretStore>> {
        let store = GithubSecretStore::new(self.repo_token.clone(), self.repository.clone())?
            .with_api_base(&self.github_api_url);
        Ok(Box::new(store))
    }
}

/// Last two labels of a host name: `a.run.claw.cloud` -> `claw.cloud`.
fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.trim_end_matches('.').split('.').collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }
    labels[labels.len() - 2..].join(".")
}
