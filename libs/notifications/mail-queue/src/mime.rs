//! MIME composition with lettre's message builder.
//!
//! Attachment messages are `multipart/related`: a `multipart/alternative`
//! text+HTML part followed by the inline image. HTML bodies reference the
//! image as `cid:instai_web_image`.

use crate::error::{MailerError, MailerResult};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MessageBuilder, MultiPart};
use lettre::Message;
use std::path::Path;

/// Content-ID of the inline image in attachment messages
pub const INLINE_IMAGE_CONTENT_ID: &str = "instai_web_image";

/// Guess an image content type from the file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn headers(sender: &str, recipients: &[String], subject: &str) -> MailerResult<MessageBuilder> {
    let from: Mailbox = sender.parse()?;
    let mut builder = Message::builder().from(from).subject(subject);

    for recipient in recipients {
        let to: Mailbox = recipient.parse()?;
        builder = builder.to(to);
    }

    Ok(builder)
}

/// Compose a text + HTML message.
pub fn compose_plain(
    sender: &str,
    recipients: &[String],
    subject: &str,
    body_text: &str,
    body_html: &str,
) -> MailerResult<Message> {
    let message = headers(sender, recipients, subject)?.multipart(
        MultiPart::alternative_plain_html(body_text.to_string(), body_html.to_string()),
    )?;
    Ok(message)
}

/// Compose a text + HTML message with `image` attached inline under
/// [`INLINE_IMAGE_CONTENT_ID`].
pub fn compose_with_inline_image(
    sender: &str,
    recipients: &[String],
    subject: &str,
    body_text: &str,
    body_html: &str,
    image: Vec<u8>,
    content_type: &str,
) -> MailerResult<Message> {
    let content_type = ContentType::parse(content_type)
        .map_err(|e| MailerError::Compose(format!("invalid content type: {e}")))?;

    let image_part =
        Attachment::new_inline(INLINE_IMAGE_CONTENT_ID.to_string()).body(image, content_type);

    let message = headers(sender, recipients, subject)?.multipart(
        MultiPart::related()
            .multipart(MultiPart::alternative_plain_html(
                body_text.to_string(),
                body_html.to_string(),
            ))
            .singlepart(image_part),
    )?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to() -> Vec<String> {
        vec!["b@x.com".to_string(), "c@x.com".to_string()]
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("logo.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("a/b/photo.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_compose_with_inline_image() {
        let message = compose_with_inline_image(
            "a@x.com",
            &to(),
            "Hi",
            "t",
            "<p><img src=\"cid:instai_web_image\"></p>",
            vec![0x89, b'P', b'N', b'G'],
            "image/png",
        )
        .unwrap();

        let raw = String::from_utf8_lossy(&message.formatted()).to_string();
        assert!(raw.contains("multipart/related"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("<instai_web_image>"));
        assert!(raw.contains("image/png"));
        assert!(raw.contains("b@x.com"));
        assert!(raw.contains("c@x.com"));
    }

    #[test]
    fn test_compose_rejects_bad_address() {
        let err = compose_plain("not an address", &to(), "Hi", "t", "h").unwrap_err();
        assert!(matches!(err, MailerError::Compose(_)));
    }
}
