//! AWS SES (Simple Email Service) mailer
//!
//! Sends via the SES v2 API:
//! - plain sends use simple content (subject, text and HTML parts)
//! - templated sends reference a template stored in SES, data as JSON
//! - attachment sends submit a raw MIME message, the only SES path that
//!   carries inline parts
//!
//! ## Configuration
//!
//! Credentials come from the standard AWS chain unless both
//! `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` are set explicitly.
//! Region: `AWS_SES_REGION`, then `AWS_REGION`.

use super::{read_attachment, Mailer, SendReceipt};
use crate::envelope::TemplateData;
use crate::error::{MailerError, MailerResult};
use crate::mime;
use async_trait::async_trait;
use aws_sdk_sesv2::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_sesv2::primitives::Blob;
use aws_sdk_sesv2::types::{
    Body, Content, Destination, EmailContent, Message, RawMessage, Template,
};
use aws_sdk_sesv2::Client;
use core_config::{env_first, ConfigError, FromEnv};
use std::path::Path;
use tracing::{debug, error};

/// Error codes worth retrying later. Anything else the provider returns is
/// treated as a permanent rejection.
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "LimitExceededException",
    "ServiceUnavailable",
    "InternalFailure",
    "RequestTimeout",
];

/// Connection settings for SES
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SesConfig {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl SesConfig {
    /// Build an SES client from this config
    pub async fn client(&self) -> Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &self.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(key_id), Some(secret)) = (&self.access_key_id, &self.secret_access_key) {
            loader = loader.credentials_provider(aws_sdk_sesv2::config::Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "mail-queue-env",
            ));
        }

        Client::new(&loader.load().await)
    }
}

impl FromEnv for SesConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok();
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();

        // Half a key pair is a misconfiguration, not a reason to silently
        // fall back to the default chain.
        match (&access_key_id, &secret_access_key) {
            (Some(_), None) => {
                return Err(ConfigError::MissingEnvVar("AWS_SECRET_ACCESS_KEY".into()));
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingEnvVar("AWS_ACCESS_KEY_ID".into()));
            }
            _ => {}
        }

        Ok(Self {
            region: env_first(&["AWS_SES_REGION", "AWS_REGION"]),
            access_key_id,
            secret_access_key,
        })
    }
}

/// Whether an SES error code is worth retrying. A missing code means the
/// request never got a service response (dispatch failure, timeout).
pub fn is_transient_code(code: Option<&str>) -> bool {
    code.is_none_or(|code| TRANSIENT_CODES.contains(&code))
}

/// Map an SDK error into a categorized [`MailerError`].
pub(crate) fn classify_sdk_error<E>(operation: &str, err: &E) -> MailerError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let code = err.code().map(str::to_string);
    let detail = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(err).to_string());
    let message = format!("SES {operation} failed: {detail}");

    error!(operation = %operation, code = ?code, error = %detail, "AWS SES request failed");

    if is_transient_code(code.as_deref()) {
        MailerError::Transient { message, code }
    } else {
        MailerError::Permanent { message, code }
    }
}

fn utf8(data: &str) -> MailerResult<Content> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .map_err(|e| MailerError::Compose(e.to_string()))
}

fn destination(recipients: &[String]) -> Destination {
    Destination::builder()
        .set_to_addresses(Some(recipients.to_vec()))
        .build()
}

/// AWS SES mailer
#[derive(Clone)]
pub struct SesMailer {
    client: Client,
}

impl SesMailer {
    /// Create a new SesMailer with an existing SES client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create from environment variables and the AWS SDK config chain
    pub async fn from_env() -> MailerResult<Self> {
        let config = SesConfig::from_env()?;
        Ok(Self::new(config.client().await))
    }

    /// The underlying SES client, shared with identity and template admin
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn send_content(
        &self,
        operation: &str,
        sender: &str,
        recipients: &[String],
        content: EmailContent,
    ) -> MailerResult<SendReceipt> {
        let response = self
            .client
            .send_email()
            .from_email_address(sender)
            .destination(destination(recipients))
            .content(content)
            .send()
            .await
            .map_err(|e| classify_sdk_error(operation, &e))?;

        let message_id = response.message_id().map(str::to_string);
        debug!(
            operation = %operation,
            message_id = ?message_id,
            recipients = ?recipients,
            "Email accepted by AWS SES"
        );

        Ok(SendReceipt { message_id })
    }
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send_plain(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body_text: &str,
        body_html: &str,
    ) -> MailerResult<SendReceipt> {
        let message = Message::builder()
            .subject(utf8(subject)?)
            .body(
                Body::builder()
                    .text(utf8(body_text)?)
                    .html(utf8(body_html)?)
                    .build(),
            )
            .build();

        let content = EmailContent::builder().simple(message).build();
        self.send_content("send email", sender, recipients, content)
            .await
    }

    async fn send_templated(
        &self,
        sender: &str,
        recipients: &[String],
        template_name: &str,
        template_data: &TemplateData,
    ) -> MailerResult<SendReceipt> {
        let template = Template::builder()
            .template_name(template_name)
            .template_data(serde_json::to_string(template_data)?)
            .build();

        let content = EmailContent::builder().template(template).build();
        self.send_content("send templated email", sender, recipients, content)
            .await
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

        let raw = RawMessage::builder()
            .data(Blob::new(message.formatted()))
            .build()
            .map_err(|e| MailerError::Compose(e.to_string()))?;

        let content = EmailContent::builder().raw(raw).build();
        self.send_content("send raw email", sender, recipients, content)
            .await
    }

    fn name(&self) -> &'static str {
        "aws-ses"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_codes() {
        assert!(is_transient_code(None));
        assert!(is_transient_code(Some("TooManyRequestsException")));
        assert!(!is_transient_code(Some("MessageRejected")));
        assert!(!is_transient_code(Some("NotFoundException")));
    }

    #[test]
    fn test_config_from_env_default_chain() {
        temp_env::with_vars(
            [
                ("AWS_ACCESS_KEY_ID", None),
                ("AWS_SECRET_ACCESS_KEY", None),
                ("AWS_SES_REGION", Some("ap-northeast-1")),
                ("AWS_REGION", Some("us-east-1")),
            ],
            || {
                let config = SesConfig::from_env().unwrap();
                assert_eq!(config.region.as_deref(), Some("ap-northeast-1"));
                assert!(config.access_key_id.is_none());
            },
        );
    }

    #[test]
    fn test_config_from_env_half_key_pair() {
        temp_env::with_vars(
            [
                ("AWS_ACCESS_KEY_ID", Some("AKIDEXAMPLE")),
                ("AWS_SECRET_ACCESS_KEY", None),
            ],
            || {
                let err = SesConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("AWS_SECRET_ACCESS_KEY"));
            },
        );
    }

    #[test]
    fn test_destination_keeps_order() {
        let to = vec!["b@x.com".to_string(), "c@x.com".to_string()];
        assert_eq!(destination(&to).to_addresses(), to.as_slice());
    }
}
