//! Mailer implementations
//!
//! The dispatch worker only talks to the [`Mailer`] trait. Shipped
//! implementations:
//! - [`SesMailer`]: AWS SES v2 (simple, templated and raw sends)
//! - [`SmtpMailer`]: SMTP relay via lettre, templates rendered locally
//! - [`RecordingMailer`]: in-memory double that records calls in order

pub mod recording;
pub mod ses;
pub mod smtp;

pub use recording::{RecordingMailer, SentMail};
pub use ses::{SesConfig, SesMailer};
pub use smtp::{SmtpConfig, SmtpMailer};

use crate::envelope::TemplateData;
use crate::error::MailerResult;
use async_trait::async_trait;
use std::path::Path;

/// Result of a successful send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Provider-specific message ID, if the provider returned one
    pub message_id: Option<String>,
}

impl SendReceipt {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
        }
    }
}

/// Port to the external mail-sending provider.
///
/// Every failure is reported through the returned `Result`; implementations
/// must not panic on provider errors. The worker awaits one call at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a message with a subject and text/HTML bodies.
    async fn send_plain(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body_text: &str,
        body_html: &str,
    ) -> MailerResult<SendReceipt>;

    /// Send a message rendered from a named template.
    async fn send_templated(
        &self,
        sender: &str,
        recipients: &[String],
        template_name: &str,
        template_data: &TemplateData,
    ) -> MailerResult<SendReceipt>;

    /// Send text/HTML bodies plus the image at `attachment_path` inline.
    ///
    /// The file is read before anything is sent; a missing or unreadable
    /// file is a [`MailerError::Attachment`](crate::MailerError::Attachment).
    async fn send_with_attachment(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body_text: &str,
        body_html: &str,
        attachment_path: &Path,
    ) -> MailerResult<SendReceipt>;

    /// Mailer name for logging
    fn name(&self) -> &'static str;
}

/// Read an attachment into memory.
pub(crate) async fn read_attachment(path: &Path) -> MailerResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|source| crate::error::MailerError::Attachment {
            path: path.to_path_buf(),
            source,
        })
}
