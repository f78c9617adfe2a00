pub mod mailer;

pub use mailer::{LogMailer, MailError, Mailer, OutgoingEmail, SmtpMailer};
