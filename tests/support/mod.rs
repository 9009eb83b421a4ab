#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use clawmon::auth::{AUTHORIZE_BUTTON, LOGIN_INPUT, OTP_INPUT, PASSWORD_INPUT, SUBMIT_BUTTON};
use clawmon::browser::{BrowserLauncher, BrowserSession, Cookie, Locator};
use clawmon::credentials::{SESSION_COOKIE, SESSION_DOMAIN};
use clawmon::error::RotateError;
use clawmon::notify::Notifier;
use clawmon::secrets::SecretStore;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

pub const BASE_URL: &str = "https://eu-west-1.run.claw.test";
pub const USERNAME: &str = "octocat";
pub const PASSWORD: &str = "correct horse";
pub const ISSUED_SESSION: &str = "fresh-session-token";

const GITHUB_LOGIN: &str = "https://github.com/login?return_to=%2Flogin%2Foauth%2Fauthorize";
const GITHUB_SESSION: &str = "https://github.com/session";
const GITHUB_TWO_FACTOR: &str = "https://github.com/sessions/two-factor/app";
const GITHUB_AUTHORIZE: &str = "https://github.com/login/oauth/authorize?client_id=claw";

/// How the simulated target site and identity provider behave.
#[derive(Debug, Clone)]
pub struct SiteScript {
    /// Provider session values the provider accepts without a password.
    pub valid_sessions: Vec<String>,
    pub require_two_factor: bool,
    pub two_factor_code: String,
    /// The provider asks to authorize the target app until it is approved.
    pub consent: bool,
    /// The provider hands control back to the target site after login.
    pub redirects: bool,
    /// Text blocks on the billing page. `None` means the page never renders.
    pub plan_page: Option<Vec<String>>,
    /// Cookie value the provider issues after a successful interactive login.
    pub issued_session: String,
}

impl Default for SiteScript {
    fn default() -> Self {
        Self {
            valid_sessions: Vec::new(),
            require_two_factor: false,
            two_factor_code: "123456".to_string(),
            consent: false,
            redirects: true,
            plan_page: Some(vec![
                "Plan".to_string(),
                "Credits Available".to_string(),
                "$4.87".to_string(),
                "2/5 used".to_string(),
            ]),
            issued_session: ISSUED_SESSION.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct PageState {
    location: String,
    cookies: Vec<Cookie>,
    fields: Vec<(String, String)>,
    clicks: Vec<String>,
    visits: Vec<String>,
    screenshots: Vec<PathBuf>,
    authorized: bool,
}

/// Scripted stand-in for a browser talking to the target site and GitHub.
#[derive(Debug)]
pub struct FakeBrowser {
    script: SiteScript,
    state: Mutex<PageState>,
    closes: AtomicUsize,
}

impl FakeBrowser {
    pub fn new(script: SiteScript) -> Self {
        Self {
            script,
            state: Mutex::new(PageState {
                location: "about:blank".to_string(),
                ..PageState::default()
            }),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Every `(selector, value)` filled, in order.
    pub fn filled(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().fields.clone()
    }

    pub fn filled_selector(&self, selector: &str) -> bool {
        self.filled().iter().any(|(s, _)| s == selector)
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn visits(&self) -> Vec<String> {
        self.state.lock().unwrap().visits.clone()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().screenshots.clone()
    }

    pub fn cookie_jar(&self) -> Vec<Cookie> {
        self.state.lock().unwrap().cookies.clone()
    }

    fn field(state: &PageState, selector: &str) -> Option<String> {
        state
            .fields
            .iter()
            .rev()
            .find(|(s, _)| s == selector)
            .map(|(_, v)| v.clone())
    }

    fn provider_session_valid(&self, state: &PageState) -> bool {
        state.cookies.iter().any(|c| {
            c.name == SESSION_COOKIE
                && c.domain.trim_start_matches('.') == SESSION_DOMAIN
                && (self.script.valid_sessions.contains(&c.value)
                    || c.value == self.script.issued_session)
        })
    }

    fn after_provider_login(&self, state: &mut PageState) {
        if self.script.consent && !state.authorized {
            state.location = GITHUB_AUTHORIZE.to_string();
        } else {
            self.hand_back(state);
        }
    }

    fn hand_back(&self, state: &mut PageState) {
        if self.script.redirects {
            state.location = format!("{BASE_URL}/apps");
        } else {
            state.location = "https://github.com/login/oauth/callback-error".to_string();
        }
    }

    fn issue_session(&self, state: &mut PageState) {
        state.cookies.retain(|c| c.name != SESSION_COOKIE);
        state.cookies.push(Cookie {
            name: SESSION_COOKIE.to_string(),
            value: self.script.issued_session.clone(),
            domain: SESSION_DOMAIN.to_string(),
            path: "/".to_string(),
        });
    }

    fn on_plan_page(&self, state: &PageState) -> bool {
        state.location == format!("{BASE_URL}/plan")
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.visits.push(url.to_string());
        state.location = url.to_string();
        Ok(())
    }

    async fn location(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().location.clone())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.fields.push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&self, target: &Locator) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.clicks.push(target.to_string());

        match target {
            Locator::Text { tag, text } if tag == "button" && text == "GitHub" => {
                if !state.location.ends_with("/signin") {
                    bail!("no GitHub button on {}", state.location);
                }
                if self.provider_session_valid(&state) {
                    self.after_provider_login(&mut state);
                } else {
                    state.location = GITHUB_LOGIN.to_string();
                }
            }
            Locator::Css(selector) if selector == SUBMIT_BUTTON => {
                let login = Self::field(&state, LOGIN_INPUT);
                let password = Self::field(&state, PASSWORD_INPUT);
                if login.as_deref() == Some(USERNAME) && password.as_deref() == Some(PASSWORD) {
                    if self.script.require_two_factor {
                        state.location = GITHUB_TWO_FACTOR.to_string();
                    } else {
                        self.issue_session(&mut state);
                        self.after_provider_login(&mut state);
                    }
                } else {
                    state.location = GITHUB_SESSION.to_string();
                }
            }
            Locator::Css(selector) if selector == AUTHORIZE_BUTTON => {
                state.authorized = true;
                self.hand_back(&mut state);
            }
            other => bail!("unexpected click on {other}"),
        }
        Ok(())
    }

    async fn is_present(&self, target: &Locator) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(match target {
            Locator::Text { text, .. } if text == "GitHub" => state.location.ends_with("/signin"),
            Locator::Css(selector) if selector == AUTHORIZE_BUTTON => {
                state.location.starts_with(GITHUB_AUTHORIZE) && !state.authorized
            }
            _ => false,
        })
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let on_prompt = selector == OTP_INPUT && key == "Enter" && state.location == GITHUB_TWO_FACTOR;
        if on_prompt
            && Self::field(&state, OTP_INPUT).as_deref() == Some(self.script.two_factor_code.as_str())
        {
            self.issue_session(&mut state);
            self.after_provider_login(&mut state);
        }
        Ok(())
    }

    async fn settle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn wait_for_url(&self, pattern: &Regex, _timeout: Duration) -> Result<bool> {
        Ok(pattern.is_match(&self.state.lock().unwrap().location))
    }

    async fn wait_for_text(&self, text: &str, _timeout: Duration) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if !self.on_plan_page(&state) {
            return Ok(false);
        }
        Ok(self
            .script
            .plan_page
            .as_ref()
            .is_some_and(|blocks| blocks.iter().any(|b| b.contains(text))))
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.cookie_jar())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for cookie in cookies {
            state
                .cookies
                .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
            state.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        std::fs::write(path, b"\x89PNG\r\n\x1a\nfake")?;
        self.state.lock().unwrap().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn text_snippets(&self, _selector: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if !self.on_plan_page(&state) {
            return Ok(Vec::new());
        }
        Ok(self.script.plan_page.clone().unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one shared [`FakeBrowser`] so tests can inspect it afterwards.
pub struct FakeLauncher {
    browser: Arc<FakeBrowser>,
    launches: AtomicUsize,
    fail: bool,
}

impl FakeLauncher {
    pub fn new(browser: Arc<FakeBrowser>) -> Self {
        Self {
            browser,
            launches: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing(browser: Arc<FakeBrowser>) -> Self {
        Self {
            fail: true,
            ..Self::new(browser)
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

struct SharedSession(Arc<FakeBrowser>);

#[async_trait]
impl BrowserSession for SharedSession {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        self.0.goto(url, timeout).await
    }
    async fn location(&self) -> Result<String> {
        self.0.location().await
    }
    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.0.fill(selector, value).await
    }
    async fn click(&self, target: &Locator) -> Result<()> {
        self.0.click(target).await
    }
    async fn is_present(&self, target: &Locator) -> Result<bool> {
        self.0.is_present(target).await
    }
    async fn press_key(&self, selector: &str, key: &str) -> Result<()> {
        self.0.press_key(selector, key).await
    }
    async fn settle(&self, timeout: Duration) -> Result<()> {
        self.0.settle(timeout).await
    }
    async fn wait_for_url(&self, pattern: &Regex, timeout: Duration) -> Result<bool> {
        self.0.wait_for_url(pattern, timeout).await
    }
    async fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<bool> {
        self.0.wait_for_text(text, timeout).await
    }
    async fn cookies(&self) -> Result<Vec<Cookie>> {
        self.0.cookies().await
    }
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        self.0.set_cookies(cookies).await
    }
    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.0.screenshot(path).await
    }
    async fn text_snippets(&self, selector: &str) -> Result<Vec<String>> {
        self.0.text_snippets(selector).await
    }
    async fn close(&self) -> Result<()> {
        self.0.close().await
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("chrome not found");
        }
        Ok(Box::new(SharedSession(self.browser.clone())))
    }
}

/// Notifier that records everything and answers challenges from a script.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    photos: Mutex<Vec<(PathBuf, String)>>,
    codes: Mutex<VecDeque<String>>,
    code_requests: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with these codes, one per challenge.
    pub fn with_codes(codes: &[&str]) -> Self {
        let notifier = Self::default();
        notifier
            .codes
            .lock()
            .unwrap()
            .extend(codes.iter().map(|c| c.to_string()));
        notifier
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn photos(&self) -> Vec<(PathBuf, String)> {
        self.photos.lock().unwrap().clone()
    }

    pub fn code_requests(&self) -> usize {
        self.code_requests.load(Ordering::SeqCst)
    }

    /// Messages that look like the end-of-run summary.
    pub fn summaries(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|m| m.contains("<b>Status:</b>"))
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn announce(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    async fn attach(&self, image: &Path, caption: &str) {
        if image.exists() {
            self.photos
                .lock()
                .unwrap()
                .push((image.to_path_buf(), caption.to_string()));
        }
    }

    async fn await_code(&self, _timeout: Duration) -> Option<String> {
        self.code_requests.fetch_add(1, Ordering::SeqCst);
        self.codes.lock().unwrap().pop_front()
    }
}

/// Secret store that remembers what it was asked to publish.
#[derive(Debug, Default)]
pub struct RecordingSecretStore {
    rotations: Mutex<Vec<(String, String)>>,
    reject_with: Option<u16>,
}

impl RecordingSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(status: u16) -> Self {
        Self {
            reject_with: Some(status),
            ..Self::default()
        }
    }

    pub fn rotations(&self) -> Vec<(String, String)> {
        self.rotations.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecretStore for RecordingSecretStore {
    async fn rotate(&self, name: &str, plaintext: &SecretString) -> Result<(), RotateError> {
        self.rotations
            .lock()
            .unwrap()
            .push((name.to_string(), plaintext.expose_secret().to_string()));
        match self.reject_with {
            Some(status) => Err(RotateError::Rejected { status }),
            None => Ok(()),
        }
    }
}
