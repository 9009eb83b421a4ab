//! Diagnostic screenshots taken during a run.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::browser::BrowserSession;
use crate::clock::Clock;

/// Writes screenshots into one directory and remembers the latest one.
pub struct Artifacts {
    dir: PathBuf,
    last: Mutex<Option<PathBuf>>,
}

impl Artifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last: Mutex::new(None),
        }
    }

    /// Take a screenshot named `<millis>_<name>.png`. Failures are logged, never raised.
    pub async fn capture(
        &self,
        session: &dyn BrowserSession,
        clock: &dyn Clock,
        name: &str,
    ) -> Option<PathBuf> {
        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::warn!(error = %err, dir = %self.dir.display(), "Cannot create artifact dir");
            return None;
        }
        let path = self
            .dir
            .join(format!("{}_{name}.png", clock.now().timestamp_millis()));

        match session.screenshot(&path).await {
            Ok(()) => {
                *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(path.clone());
                Some(path)
            }
            Err(err) => {
                tracing::warn!(error = %err, name, "Screenshot failed");
                None
            }
        }
    }

    /// The most recent successful screenshot.
    pub fn last(&self) -> Option<PathBuf> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
