use crate::backup::function_path;
use crate::backup::notifications::{AlertPriority, Notification};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithFnName, WithMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Display;
use validator::Validate;

fn default_subject() -> String {
    "Cassandra backup".to_string()
}

/// Configuration for SMTP email alerts
///
/// Supports SSL, StartTLS, and unsecured connections. The password is a
/// `RedactedString` so it never shows up in logs.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[validate(length(min = 1))]
    #[builder(into)]
    host: String,
    port: Option<u16>,
    smtp_mode: SmtpMode,
    from: Mailbox,
    #[validate(length(min = 1))]
    to: Vec<Mailbox>,
    #[serde(default = "default_subject")]
    #[builder(into, default = default_subject())]
    subject: String,
    #[builder(into)]
    username: Option<String>,
    password: Option<RedactedString>,
}

/// SMTP connection security modes
///
/// - `Unsecured`: Plain text connection (not recommended for production)
/// - `Ssl`: SSL/TLS encrypted connection from start
/// - `StartTls`: Start with plain text, then upgrade to TLS
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    StartTls,
}

impl SmtpNotificationConfig {
    #[named]
    fn build_email<D: Display>(&self, message: D, priority: AlertPriority) -> Result<Message> {
        self.to
            .iter()
            .fold(Message::builder(), |email, send_to| email.to(send_to.clone()))
            .from(self.from.clone())
            .subject(format!("[{priority}] {}", self.subject))
            .header(ContentType::TEXT_PLAIN)
            .body(message.to_string())
            .map_err(Error::from)
            .with_msg(format!(
                "Fail to build alert email from {:?} to {:?}",
                self.from, self.to
            ))
            .with_fn_name(function_path!())
    }

    #[named]
    fn build_transport(&self) -> Result<SmtpTransport> {
        let mut builder = match self.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(self.host.as_str())),
            SmtpMode::Ssl => SmtpTransport::relay(self.host.as_str()),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(self.host.as_str()),
        }
        .map_err(Error::from)
        .with_msg(format!(
            "Failed to build smtp client for host: {:?} with mode {:?}",
            self.host, self.smtp_mode
        ))
        .with_fn_name(function_path!())?;

        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.inner().to_string(),
            ));
        }
        Ok(builder.build())
    }
}

impl Notification for SmtpNotificationConfig {
    #[named]
    fn alert<D: Display>(&self, message: D, priority: AlertPriority) -> Result<()> {
        tracing::info!(
            "Sending {priority} alert email from {:?} to {:?}",
            self.from,
            self.to
        );
        let email = self.build_email(message, priority)?;
        let response = self
            .build_transport()?
            .send(&email)
            .map_err(Error::from)
            .with_fn_name(function_path!())?;

        if response.is_positive() {
            Ok(())
        } else {
            let error_vec = response
                .message()
                .map(|m| Error::SmtpSendError(m.to_owned()))
                .collect_vec();
            if error_vec.is_empty() {
                Err(Error::SmtpSendError(format!("{:?}", response.code())))
            } else {
                Err(Error::from(error_vec))
            }
        }
    }
}
