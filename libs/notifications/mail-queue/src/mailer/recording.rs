//! Recording mailer for testing
//!
//! Captures every call in order. Can be told to fail for specific recipients
//! (or always) and to take a fixed amount of time per call.

use super::{read_attachment, Mailer, SendReceipt};
use crate::envelope::{EnvelopeKind, TemplateData};
use crate::error::{MailerError, MailerResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One call observed by [`RecordingMailer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub kind: EnvelopeKind,
    pub sender: String,
    pub recipients: Vec<String>,
    /// Subject, or the template name for templated sends
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub template_data: Option<TemplateData>,
    pub attachment_path: Option<PathBuf>,
    /// Attachment size in bytes, once it was read successfully
    pub attachment_len: Option<usize>,
}

/// In-memory mailer that records sends instead of delivering them.
///
/// Failed calls are recorded too, so tests can assert on attempt order.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    calls: Arc<Mutex<Vec<SentMail>>>,
    fail_for: Arc<Mutex<HashSet<String>>>,
    failure_message: Option<String>,
    delay: Option<Duration>,
    in_call: Arc<AtomicUsize>,
    max_in_call: Arc<AtomicUsize>,
}

impl RecordingMailer {
    /// Create a mailer that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mailer that rejects every call
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Reject sends addressed to `recipient`
    pub fn fail_for(self, recipient: impl Into<String>) -> Self {
        self.fail_for.lock().insert(recipient.into());
        self
    }

    /// Take `delay` to complete each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All calls so far, in call order
    pub fn calls(&self) -> Vec<SentMail> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of calls ever observed running at the same time
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_call.load(Ordering::SeqCst)
    }

    /// Check whether any call was addressed to `recipient`
    pub fn was_sent_to(&self, recipient: &str) -> bool {
        self.calls
            .lock()
            .iter()
            .any(|c| c.recipients.iter().any(|r| r == recipient))
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    async fn record(&self, mail: SentMail) -> MailerResult<SendReceipt> {
        let running = self.in_call.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_call.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let rejected = {
            let fail_for = self.fail_for.lock();
            mail.recipients.iter().find(|r| fail_for.contains(*r)).cloned()
        };

        let id = {
            let mut calls = self.calls.lock();
            calls.push(mail);
            calls.len()
        };
        self.in_call.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = &self.failure_message {
            return Err(MailerError::transient(message.clone()));
        }
        if let Some(recipient) = rejected {
            return Err(MailerError::Permanent {
                message: format!("Address rejected: {recipient}"),
                code: Some("MessageRejected".to_string()),
            });
        }

        Ok(SendReceipt::new(format!("recorded-{id}")))
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_plain(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body_text: &str,
        body_html: &str,
    ) -> MailerResult<SendReceipt> {
        self.record(SentMail {
            kind: EnvelopeKind::Regular,
            sender: sender.to_string(),
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body_text: Some(body_text.to_string()),
            body_html: Some(body_html.to_string()),
            template_data: None,
            attachment_path: None,
            attachment_len: None,
        })
        .await
    }

    async fn send_templated(
        &self,
        sender: &str,
        recipients: &[String],
        template_name: &str,
        template_data: &TemplateData,
    ) -> MailerResult<SendReceipt> {
        self.record(SentMail {
            kind: EnvelopeKind::Templated,
            sender: sender.to_string(),
            recipients: recipients.to_vec(),
            subject: template_name.to_string(),
            body_text: None,
            body_html: None,
            template_data: Some(template_data.clone()),
            attachment_path: None,
            attachment_len: None,
        })
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
        // Local I/O errors surface before anything is recorded as sent.
        let bytes = read_attachment(attachment_path).await?;

        self.record(SentMail {
            kind: EnvelopeKind::Attachment,
            sender: sender.to_string(),
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body_text: Some(body_text.to_string()),
            body_html: Some(body_html.to_string()),
            template_data: None,
            attachment_path: Some(attachment_path.to_path_buf()),
            attachment_len: Some(bytes.len()),
        })
        .await
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let mailer = RecordingMailer::new();
        let to = vec!["b@x.com".to_string()];

        mailer
            .send_plain("a@x.com", &to, "first", "t", "<p>t</p>")
            .await
            .unwrap();
        mailer
            .send_templated("a@x.com", &to, "welcome", &TemplateData::new())
            .await
            .unwrap();

        let calls = mailer.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].subject, "first");
        assert_eq!(calls[1].kind, EnvelopeKind::Templated);
        assert!(mailer.was_sent_to("b@x.com"));
    }

    #[tokio::test]
    async fn test_fail_for_recipient() {
        let mailer = RecordingMailer::new().fail_for("bad@x.com");

        let err = mailer
            .send_plain("a@x.com", &["bad@x.com".to_string()], "s", "t", "h")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("MessageRejected"));

        assert!(mailer
            .send_plain("a@x.com", &["good@x.com".to_string()], "s", "t", "h")
            .await
            .is_ok());
        assert_eq!(mailer.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_mailer() {
        let mailer = RecordingMailer::failing("Throttling");
        let err = mailer
            .send_plain("a@x.com", &["b@x.com".to_string()], "s", "t", "h")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Throttling"));
    }

    #[tokio::test]
    async fn test_missing_attachment_is_not_recorded() {
        let mailer = RecordingMailer::new();
        let result = mailer
            .send_with_attachment(
                "a@x.com",
                &["b@x.com".to_string()],
                "s",
                "t",
                "h",
                Path::new("/no/such/image.png"),
            )
            .await;

        assert!(matches!(result, Err(MailerError::Attachment { .. })));
        assert_eq!(mailer.call_count(), 0);
    }
}
