//! SMTP mailer using lettre
//!
//! Also covers the SES SMTP interface (`email-smtp.<region>.amazonaws.com`).
//! SMTP has no server-side templates, so templated sends render a locally
//! registered [`MailTemplate`] with Handlebars.

use super::{read_attachment, Mailer, SendReceipt};
use crate::envelope::TemplateData;
use crate::error::{MailerError, MailerResult};
use crate::mime;
use crate::templates::{LocalTemplates, MailTemplate};
use async_trait::async_trait;
use core_config::{env_flag, env_or_default, env_parse, env_required, ConfigError, FromEnv};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::Path;
use tracing::{debug, error};

/// SMTP mailer configuration
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("use_tls", &self.use_tls)
            .finish_non_exhaustive()
    }
}

impl FromEnv for SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_required("SMTP_HOST")?,
            port: env_parse("SMTP_PORT", 587)?,
            username: env_or_default("SMTP_USERNAME", ""),
            password: env_or_default("SMTP_PASSWORD", ""),
            use_tls: env_flag("SMTP_USE_TLS", true),
        })
    }
}

/// SMTP mailer
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    templates: LocalTemplates,
}

impl SmtpMailer {
    /// Create a new SMTP mailer
    pub fn new(config: SmtpConfig) -> MailerResult<Self> {
        let transport = if config.use_tls {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailerError::Config(format!("failed to create SMTP relay: {e}")))?
                .credentials(creds)
                .port(config.port)
                .build()
        } else if !config.username.is_empty() {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .credentials(creds)
                .port(config.port)
                .build()
        } else {
            // No auth (Mailpit/Mailhog)
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .build()
        };

        Ok(Self {
            transport,
            templates: LocalTemplates::new(),
        })
    }

    /// Create a mailer from environment variables
    pub fn from_env() -> MailerResult<Self> {
        Self::new(SmtpConfig::from_env()?)
    }

    /// Register a template for templated sends
    pub fn with_template(mut self, template: MailTemplate) -> MailerResult<Self> {
        self.templates.register(template)?;
        Ok(self)
    }

    async fn deliver(&self, message: Message) -> MailerResult<SendReceipt> {
        let response = self.transport.send(message).await.map_err(|e| {
            error!(error = %e, "SMTP send failed");
            // 4xx replies and connection problems may clear up; 5xx will not.
            if e.is_permanent() {
                MailerError::Permanent {
                    message: e.to_string(),
                    code: e.status().map(|c| c.to_string()),
                }
            } else {
                MailerError::Transient {
                    message: e.to_string(),
                    code: e.status().map(|c| c.to_string()),
                }
            }
        })?;

        let reply = response.message().collect::<Vec<_>>().join(" ");
        debug!(code = %response.code(), reply = %reply, "Email accepted by SMTP server");

        Ok(SendReceipt {
            message_id: (!reply.is_empty()).then_some(reply),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_plain(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body_text: &str,
        body_html: &str,
    ) -> MailerResult<SendReceipt> {
        let message = mime::compose_plain(sender, recipients, subject, body_text, body_html)?;
        self.deliver(message).await
    }

    async fn send_templated(
        &self,
        sender: &str,
        recipients: &[String],
        template_name: &str,
        template_data: &TemplateData,
    ) -> MailerResult<SendReceipt> {
        let rendered = self.templates.render(template_name, template_data)?;
        let message = mime::compose_plain(
            sender,
            recipients,
            &rendered.subject,
            &rendered.text,
            &rendered.html,
        )?;
        self.deliver(message).await
    }

    async fn send_with_attachment(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body_text: &str,
        body_html: &str,
        attachment_path: &Path,
    ) -> MailerResult<SendReceipt> {
        let image = read_attachment(attachment_path).await?;
        let message = mime::compose_with_inline_image(
            sender,
            recipients,
            subject,
            body_text,
            body_html,
            image,
            mime::content_type_for(attachment_path),
        )?;
        self.deliver(message).await
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> SmtpConfig {
        SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            username: String::new(),
            password: String::new(),
            use_tls: false,
        }
    }

    #[test]
    fn test_config_from_env() {
        temp_env::with_vars(
            [
                ("SMTP_HOST", Some("email-smtp.us-east-1.amazonaws.com")),
                ("SMTP_PORT", None),
                ("SMTP_USERNAME", Some("user")),
                ("SMTP_PASSWORD", Some("secret")),
                ("SMTP_USE_TLS", None),
            ],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(config.port, 587);
                assert!(config.use_tls);
                assert!(!format!("{config:?}").contains("secret"));
            },
        );
    }

    #[test]
    fn test_config_requires_host() {
        temp_env::with_var_unset("SMTP_HOST", || {
            assert!(SmtpConfig::from_env().is_err());
        });
    }

    #[tokio::test]
    async fn test_templated_send_with_unknown_template_fails_before_delivery() {
        let mailer = SmtpMailer::new(local_config()).unwrap();

        let err = mailer
            .send_templated("a@x.com", &["b@x.com".to_string()], "welcome", &TemplateData::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MailerError::Template(_)));
    }

    #[tokio::test]
    async fn test_missing_attachment_fails_before_delivery() {
        let mailer = SmtpMailer::new(local_config()).unwrap();

        let err = mailer
            .send_with_attachment(
                "a@x.com",
                &["b@x.com".to_string()],
                "Hi",
                "t",
                "h",
                Path::new("/no/such/logo.png"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MailerError::Attachment { .. }));
    }
}
