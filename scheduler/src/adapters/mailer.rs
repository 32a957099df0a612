use crate::ports::Mailer;
use async_trait::async_trait;

/// Records the would-be message via `log::info!`. No real SMTP/MTA
/// integration; a production deployment would swap this adapter, not the
/// `Mailer` trait.
pub struct LoggingMailer;

impl LoggingMailer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailer for LoggingMailer {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) {
        log::info!(target: "adapters::LoggingMailer::send_mail", "to={to} subject={subject:?} body={body:?}");
    }
}
