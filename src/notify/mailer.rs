use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use thiserror::Error;
use tracing::{error, info};

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid mailbox '{0}'")]
    Address(String),

    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl OutgoingEmail {
    pub fn confirmation(to: &str, base_url: &str, token: &str) -> Self {
        let link = format!("{base_url}/auth/verify-email?token={token}");
        Self {
            to: to.to_string(),
            subject: "Confirm your EduManage account".to_string(),
            html: format!(
                "<p>Welcome to EduManage.</p>\
                 <p>Confirm your email address by opening <a href=\"{link}\">{link}</a>.</p>"
            ),
        }
    }

    pub fn password_reset(to: &str, base_url: &str, token: &str, ttl_minutes: i64) -> Self {
        let link = format!("{base_url}/reset-password?token={token}");
        Self {
            to: to.to_string(),
            subject: "Reset your EduManage password".to_string(),
            html: format!(
                "<p>A password reset was requested for this account.</p>\
                 <p>Choose a new password at <a href=\"{link}\">{link}</a>. \
                 The link expires in {ttl_minutes} minutes.</p>"
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(smtp: &SmtpConfig, from: &str) -> Result<Self, MailError> {
        let from: Mailbox = from
            .parse()
            .map_err(|_| MailError::Address(from.to_string()))?;

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?.port(smtp.port);
        if let (Some(user), Some(pass)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|_| MailError::Address(email.to.clone()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!(to = %email.to, subject = %email.subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                error!(to = %email.to, error = %e, "Email delivery failed");
                Err(e.into())
            }
        }
    }
}

/// Writes outgoing mail to the log. Used when no SMTP host is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, body = %email.html, "Email not sent (no SMTP host configured)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_link_points_at_verify_endpoint() {
        let mail = OutgoingEmail::confirmation("a@b.org", "https://school.example", "tok123");
        assert_eq!(mail.to, "a@b.org");
        assert!(mail.html.contains("https://school.example/auth/verify-email?token=tok123"));
    }

    #[test]
    fn reset_mail_mentions_expiry() {
        let mail = OutgoingEmail::password_reset("a@b.org", "http://localhost:3000", "r1", 60);
        assert!(mail.html.contains("reset-password?token=r1"));
        assert!(mail.html.contains("60 minutes"));
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let mail = OutgoingEmail::confirmation("a@b.org", "http://x", "t");
        assert!(LogMailer.send(&mail).await.is_ok());
    }
}
