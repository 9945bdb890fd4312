//! Envelopes: one pending send request each.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Template variables for a templated send.
pub type TemplateData = BTreeMap<String, String>;

/// Kind of envelope, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Regular,
    Templated,
    Attachment,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeKind::Regular => write!(f, "regular"),
            EnvelopeKind::Templated => write!(f, "templated"),
            EnvelopeKind::Attachment => write!(f, "attachment"),
        }
    }
}

/// A pending send request.
///
/// Envelopes are immutable once enqueued and carry no ack token: each one is
/// attempted exactly once by the dispatch worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    /// Subject plus text and HTML bodies.
    Regular {
        sender: String,
        recipients: Vec<String>,
        subject: String,
        body_text: String,
        body_html: String,
    },
    /// A provider-side template rendered with `template_data`.
    Templated {
        sender: String,
        recipients: Vec<String>,
        template_name: String,
        template_data: TemplateData,
    },
    /// Text and HTML bodies with an inline image read from `image_path`.
    Attachment {
        sender: String,
        recipients: Vec<String>,
        subject: String,
        body_text: String,
        body_html: String,
        image_path: PathBuf,
    },
}

impl Envelope {
    pub fn regular(
        sender: impl Into<String>,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body_text: impl Into<String>,
        body_html: impl Into<String>,
    ) -> Self {
        Envelope::Regular {
            sender: sender.into(),
            recipients,
            subject: subject.into(),
            body_text: body_text.into(),
            body_html: body_html.into(),
        }
    }

    pub fn templated(
        sender: impl Into<String>,
        recipients: Vec<String>,
        template_name: impl Into<String>,
        template_data: TemplateData,
    ) -> Self {
        Envelope::Templated {
            sender: sender.into(),
            recipients,
            template_name: template_name.into(),
            template_data,
        }
    }

    pub fn attachment(
        sender: impl Into<String>,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body_text: impl Into<String>,
        body_html: impl Into<String>,
        image_path: impl Into<PathBuf>,
    ) -> Self {
        Envelope::Attachment {
            sender: sender.into(),
            recipients,
            subject: subject.into(),
            body_text: body_text.into(),
            body_html: body_html.into(),
            image_path: image_path.into(),
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Regular { .. } => EnvelopeKind::Regular,
            Envelope::Templated { .. } => EnvelopeKind::Templated,
            Envelope::Attachment { .. } => EnvelopeKind::Attachment,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Envelope::Regular { sender, .. }
            | Envelope::Templated { sender, .. }
            | Envelope::Attachment { sender, .. } => sender,
        }
    }

    pub fn recipients(&self) -> &[String] {
        match self {
            Envelope::Regular { recipients, .. }
            | Envelope::Templated { recipients, .. }
            | Envelope::Attachment { recipients, .. } => recipients,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let envelope = Envelope::attachment(
            "a@x.com",
            vec!["b@x.com".into(), "c@x.com".into()],
            "Hi",
            "t",
            "<p>t</p>",
            "/tmp/logo.png",
        );

        assert_eq!(envelope.kind(), EnvelopeKind::Attachment);
        assert_eq!(envelope.sender(), "a@x.com");
        assert_eq!(envelope.recipients(), ["b@x.com", "c@x.com"]);
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let mut data = TemplateData::new();
        data.insert("name".into(), "Bob".into());
        let envelope = Envelope::templated("a@x.com", vec!["b@x.com".into()], "welcome", data);

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["kind"], "templated");
        assert_eq!(json["template_data"]["name"], "Bob");
    }
}
