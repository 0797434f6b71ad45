use std::io::Write;

use async_trait::async_trait;

use crate::models::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("text channel unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sends a message to the session's text channel. Delivery is best-effort;
/// callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, session: SessionId, text: &str) -> Result<(), NotifyError>;
}

/// Writes every message to stdout as `[guild N] text`
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }

    pub fn format_line(session: SessionId, text: &str) -> String {
        format!("[{}] {}", session, text)
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, session: SessionId, text: &str) -> Result<(), NotifyError> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", Self::format_line(session, text))?;
        handle.flush()?;
        Ok(())
    }
}
