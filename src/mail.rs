//! Outbound delivery of the digest over SMTPS.
//!
//! Credentials come from `EMAIL_SENDER`, `EMAIL_PASSWORD` and
//! `EMAIL_RECEIVER` (sender and receiver may also be set in the config file).
//! When any of them is missing the mailer refuses to connect at all.

use futures::future::BoxFuture;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;

use crate::config::EmailConfig;

const PLAIN_FALLBACK: &str = "This is an HTML email. Please enable HTML viewing.";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Missing environment variables: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    #[error("Invalid email address '{address}': {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("Failed to build email: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("SMTP session timed out after {0}s")]
    Timeout(u64),
}

/// SMTP login and addressing, resolved once at startup.
pub struct EmailCredentials {
    sender: String,
    password: SecretString,
    receiver: String,
}

impl std::fmt::Debug for EmailCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailCredentials")
            .field("sender", &self.sender)
            .field("password", &"[REDACTED]")
            .field("receiver", &self.receiver)
            .finish()
    }
}

impl EmailCredentials {
    /// Resolves credentials through `lookup` (environment), falling back to
    /// the config file for sender and receiver.
    pub fn resolve<F>(config: &EmailConfig, lookup: F) -> Result<Self, MailError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve_or_missing(config, lookup).map_err(MailError::MissingCredentials)
    }

    fn resolve_or_missing<F>(config: &EmailConfig, lookup: F) -> Result<Self, Vec<&'static str>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let sender = non_empty(lookup("EMAIL_SENDER").or_else(|| config.sender.clone()));
        let password = non_empty(lookup("EMAIL_PASSWORD"));
        let receiver = non_empty(lookup("EMAIL_RECEIVER").or_else(|| config.receiver.clone()));

        match (sender, password, receiver) {
            (Some(sender), Some(password), Some(receiver)) => Ok(Self {
                sender,
                password: SecretString::from(password),
                receiver,
            }),
            (sender, password, receiver) => Err([
                ("EMAIL_SENDER", sender.is_none()),
                ("EMAIL_PASSWORD", password.is_none()),
                ("EMAIL_RECEIVER", receiver.is_none()),
            ]
            .into_iter()
            .filter_map(|(var, is_missing)| is_missing.then_some(var))
            .collect()),
        }
    }
}

/// `X-Priority: 1`, honored by most desktop clients.
#[derive(Debug, Clone, Copy)]
struct XPriority;

impl Header for XPriority {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Priority")
    }

    fn parse(_s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "1".to_string())
    }
}

/// `Importance: High`, honored by Outlook and Exchange.
#[derive(Debug, Clone, Copy)]
struct Importance;

impl Header for Importance {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Importance")
    }

    fn parse(_s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "High".to_string())
    }
}

/// Final hop of a run: hands the composed digest to its reader.
pub trait Deliver {
    /// Returns whether the digest was accepted. Failures are logged by the
    /// implementation.
    fn deliver<'a>(&'a self, subject: &'a str, html: &'a str) -> BoxFuture<'a, bool>;
}

pub struct Mailer {
    config: EmailConfig,
    credentials: Result<EmailCredentials, Vec<&'static str>>,
}

impl Mailer {
    pub fn from_config<F>(config: &EmailConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            config: config.clone(),
            credentials: EmailCredentials::resolve_or_missing(config, lookup),
        }
    }

    pub async fn send(&self, subject: &str, html: &str) -> Result<(), MailError> {
        let credentials = self
            .credentials
            .as_ref()
            .map_err(|missing| MailError::MissingCredentials(missing.clone()))?;

        let message = self.build_message(credentials, subject, html)?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                credentials.sender.clone(),
                credentials.password.expose_secret().to_string(),
            ))
            .timeout(Some(timeout))
            .build();

        tracing::debug!(host = %self.config.smtp_host, port = self.config.smtp_port, "Connecting to SMTP relay");

        tokio::time::timeout(timeout, transport.send(message))
            .await
            .map_err(|_| MailError::Timeout(timeout.as_secs()))??;
        Ok(())
    }

    fn build_message(
        &self,
        credentials: &EmailCredentials,
        subject: &str,
        html: &str,
    ) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&credentials.sender)?)
            .to(parse_mailbox(&credentials.receiver)?)
            .subject(subject);

        if self.config.high_priority {
            builder = builder.header(XPriority).header(Importance);
        }

        let message = builder.multipart(MultiPart::alternative_plain_html(
            PLAIN_FALLBACK.to_string(),
            wrap_document(html),
        ))?;
        Ok(message)
    }
}

impl Deliver for Mailer {
    fn deliver<'a>(&'a self, subject: &'a str, html: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.send(subject, html).await {
                Ok(()) => {
                    tracing::info!(host = %self.config.smtp_host, "Email sent successfully");
                    true
                }
                Err(e) => {
                    tracing::error!(host = %self.config.smtp_host, error = %e, "Error sending email");
                    false
                }
            }
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|source| MailError::InvalidAddress {
            address: address.to_string(),
            source,
        })
}

fn wrap_document(fragment: &str) -> String {
    format!("<!DOCTYPE html>\n<html><body>\n{fragment}\n</body></html>\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn full_env() -> impl Fn(&str) -> Option<String> {
        env(&[
            ("EMAIL_SENDER", "me@example.com"),
            ("EMAIL_PASSWORD", "app-password"),
            ("EMAIL_RECEIVER", "reader@example.com"),
        ])
    }

    #[test]
    fn test_missing_sender_reported() {
        let err = EmailCredentials::resolve(
            &EmailConfig::default(),
            env(&[("EMAIL_PASSWORD", "pw"), ("EMAIL_RECEIVER", "r@example.com")]),
        )
        .unwrap_err();
        match err {
            MailError::MissingCredentials(vars) => assert_eq!(vars, vec!["EMAIL_SENDER"]),
            e => panic!("Expected MissingCredentials, got {:?}", e),
        }
    }

    #[test]
    fn test_config_file_fills_sender_and_receiver() {
        let config = EmailConfig {
            sender: Some("cfg@example.com".into()),
            receiver: Some("cfg-reader@example.com".into()),
            ..EmailConfig::default()
        };
        let creds = EmailCredentials::resolve(&config, env(&[("EMAIL_PASSWORD", "pw")])).unwrap();
        assert_eq!(creds.sender, "cfg@example.com");
        assert_eq!(creds.receiver, "cfg-reader@example.com");
    }

    #[test]
    fn test_env_wins_over_config_file() {
        let config = EmailConfig {
            sender: Some("cfg@example.com".into()),
            ..EmailConfig::default()
        };
        let creds = EmailCredentials::resolve(&config, full_env()).unwrap();
        assert_eq!(creds.sender, "me@example.com");
    }

    #[test]
    fn test_debug_masks_password() {
        let creds = EmailCredentials::resolve(&EmailConfig::default(), full_env()).unwrap();
        let debug_output = format!("{:?}", creds);
        assert!(!debug_output.contains("app-password"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_send_without_sender_never_connects() {
        // smtp.invalid never resolves, so any error other than MissingCredentials means a connect was tried
        let config = EmailConfig {
            smtp_host: "smtp.invalid".into(),
            ..EmailConfig::default()
        };
        let mailer = Mailer::from_config(
            &config,
            env(&[("EMAIL_PASSWORD", "pw"), ("EMAIL_RECEIVER", "r@example.com")]),
        );

        let err = mailer.send("subject", "<p>x</p>").await.unwrap_err();
        assert!(matches!(err, MailError::MissingCredentials(_)));
        assert!(!mailer.deliver("subject", "<p>x</p>").await);
    }

    #[test]
    fn test_message_is_multipart_with_priority_headers() {
        let mailer = Mailer::from_config(&EmailConfig::default(), full_env());
        let creds = mailer.credentials.as_ref().unwrap();

        let message = mailer
            .build_message(creds, "Daily News Digest - 2026-10-18", "<h2>Executive Summary</h2>")
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: Daily News Digest - 2026-10-18"));
        assert!(raw.contains("X-Priority: 1"));
        assert!(raw.contains("Importance: High"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains(PLAIN_FALLBACK));
        assert!(raw.contains("<h2>Executive Summary</h2>"));
    }

    #[test]
    fn test_priority_headers_optional() {
        let config = EmailConfig {
            high_priority: false,
            ..EmailConfig::default()
        };
        let mailer = Mailer::from_config(&config, full_env());
        let creds = mailer.credentials.as_ref().unwrap();

        let message = mailer.build_message(creds, "s", "<p>x</p>").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(!raw.contains("X-Priority"));
    }

    #[test]
    fn test_malformed_address_rejected() {
        let mailer = Mailer::from_config(
            &EmailConfig::default(),
            env(&[
                ("EMAIL_SENDER", "not-an-address"),
                ("EMAIL_PASSWORD", "pw"),
                ("EMAIL_RECEIVER", "r@example.com"),
            ]),
        );
        let creds = mailer.credentials.as_ref().unwrap();

        let err = mailer.build_message(creds, "s", "<p>x</p>").unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_logged_not_raised() {
        // Grab a free port, then close it so the connection is refused
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = EmailConfig {
            smtp_host: "127.0.0.1".into(),
            smtp_port: port,
            timeout_secs: 5,
            ..EmailConfig::default()
        };
        let mailer = Mailer::from_config(&config, full_env());

        assert!(!mailer.deliver("s", "<p>x</p>").await);
    }
}
