//! Headless Chromium driven over the DevTools protocol.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use regex::Regex;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{BrowserLauncher, BrowserSession, Cookie, Locator};
use crate::duration::deadline_after;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches a fresh headless Chromium with a throwaway profile per run.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    chrome_path: Option<PathBuf>,
}

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self { chrome_path: None }
    }

    /// Use a specific browser executable instead of searching for one.
    pub fn with_chrome_path(mut self, path: Option<PathBuf>) -> Self {
        self.chrome_path = path;
        self
    }
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let chrome_path = match &self.chrome_path {
            Some(path) => path.clone(),
            None => PathBuf::from(find_chrome().context(
                "Chrome/Chromium not found. Install it or set CHROME_PATH.",
            )?),
        };
        let profile = TempDir::new().context("Failed to create browser profile dir")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(profile.path())
            .window_size(1280, 900)
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(format!("--user-agent={DEFAULT_USER_AGENT}"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure browser: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                handler_task.abort();
                return Err(err).context("Failed to open browser page");
            }
        };

        tracing::debug!("Launched headless browser");

        Ok(Box::new(ChromiumSession {
            page,
            browser: Mutex::new(Some(browser)),
            handler_task: Mutex::new(Some(handler_task)),
            profile: Mutex::new(Some(profile)),
        }))
    }
}

/// A single page in a launched Chromium instance.
pub struct ChromiumSession {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    profile: Mutex<Option<TempDir>>,
}

impl ChromiumSession {
    async fn find(&self, target: &Locator) -> Result<Element> {
        let element = match target.to_xpath() {
            Some(xpath) => self.page.find_xpath(xpath).await,
            None => self.page.find_element(target.to_string()).await,
        };
        element.with_context(|| format!("Element not found: {target}"))
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, expression: String) -> Result<T> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .context("Script evaluation failed")?;
        result
            .into_value::<T>()
            .context("Unexpected script result")
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .with_context(|| format!("Navigation to {url} timed out"))?
            .with_context(|| format!("Navigation to {url} failed"))?;
        Ok(())
    }

    async fn location(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .context("Failed to read page URL")?
            .unwrap_or_default())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let element = self.find(&Locator::css(selector)).await?;
        element
            .click()
            .await
            .with_context(|| format!("Failed to focus {selector}"))?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .with_context(|| format!("Failed to clear {selector}"))?;
        element
            .type_str(value)
            .await
            .with_context(|| format!("Failed to type into {selector}"))?;
        Ok(())
    }

    async fn click(&self, target: &Locator) -> Result<()> {
        self.find(target)
            .await?
            .click()
            .await
            .with_context(|| format!("Failed to click {target}"))?;
        Ok(())
    }

    async fn is_present(&self, target: &Locator) -> Result<bool> {
        let found = match target.to_xpath() {
            Some(xpath) => self.page.find_xpath(xpath).await.is_ok(),
            None => self.page.find_element(target.to_string()).await.is_ok(),
        };
        Ok(found)
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<()> {
        self.find(&Locator::css(selector))
            .await?
            .press_key(key)
            .await
            .with_context(|| format!("Failed to press {key} in {selector}"))?;
        Ok(())
    }

    async fn settle(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.wait_for_navigation()).await {
            Ok(result) => {
                result.context("Navigation failed")?;
            }
            Err(_) => tracing::debug!("Page did not settle within {timeout:?}"),
        }
        Ok(())
    }

    async fn wait_for_url(&self, pattern: &Regex, timeout: Duration) -> Result<bool> {
        let deadline = deadline_after(timeout);
        loop {
            if pattern.is_match(&self.location().await?) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<bool> {
        let needle = serde_json::to_string(text)?;
        let expression =
            format!("document.body ? document.body.innerText.includes({needle}) : false");
        let deadline = deadline_after(timeout);
        loop {
            // Pages mid-navigation reject evaluation; keep polling until the deadline.
            if let Ok(true) = self.evaluate::<bool>(expression.clone()).await {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .context("Failed to read cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let params: Vec<CookieParam> = cookies
            .iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name.clone(), c.value.clone());
                param.domain = Some(c.domain.clone());
                param.path = Some(c.path.clone());
                param.secure = Some(true);
                param.http_only = Some(true);
                param
            })
            .collect();

        if !params.is_empty() {
            self.page
                .set_cookies(params)
                .await
                .context("Failed to set cookies")?;
        }
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .with_context(|| format!("Failed to save screenshot: {}", path.display()))?;
        Ok(())
    }

    async fn text_snippets(&self, selector: &str) -> Result<Vec<String>> {
        let selector = serde_json::to_string(selector)?;
        self.evaluate(format!(
            "Array.from(document.querySelectorAll({selector})).map(e => (e.innerText || '').trim())"
        ))
        .await
    }

    async fn close(&self) -> Result<()> {
        let browser = self.browser.lock().await.take();
        let exited = match browser {
            Some(mut browser) => {
                if let Err(err) = browser.close().await {
                    tracing::debug!(error = %err, "Browser close request failed");
                }
                browser
                    .wait()
                    .await
                    .map(|_| ())
                    .context("Failed to wait for browser exit")
            }
            None => Ok(()),
        };
        let handler_task = self.handler_task.lock().await.take();
        let profile = self.profile.lock().await.take();
        release(handler_task, profile);
        exited
    }
}

/// Stop the CDP handler and delete the throwaway profile, whatever state the browser exited in.
fn release(handler_task: Option<JoinHandle<()>>, profile: Option<TempDir>) {
    if let Some(task) = handler_task {
        task.abort();
    }
    if let Some(profile) = profile {
        if let Err(err) = profile.close() {
            tracing::debug!(error = %err, "Failed to remove browser profile");
        }
    }
}

/// Find Chrome/Chromium executable.
pub fn find_chrome() -> Option<String> {
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    candidates
        .into_iter()
        .find(|candidate| Path::new(candidate).exists())
        .map(str::to_string)
}
