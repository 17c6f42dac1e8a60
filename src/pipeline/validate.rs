//! Structural message validation. Runs before anything else touches the
//! message; failures are terminal and never retried.

use crate::config::{PipelineConfig, SecurityConfig};
use crate::error::PipelineError;
use crate::InboundMessage;

pub fn validate(
    message: &InboundMessage,
    pipeline: &PipelineConfig,
    security: &SecurityConfig,
) -> Result<(), PipelineError> {
    if let Some(user_id) = &message.user_id
        && security.blocked_users.iter().any(|blocked| blocked == user_id)
    {
        return Err(PipelineError::InvalidMessage(format!(
            "user {user_id} is blocked"
        )));
    }

    if message.text.trim().is_empty() && message.attachments.is_empty() {
        return Err(PipelineError::InvalidMessage("empty message".into()));
    }

    let chars = message.text.chars().count();
    if chars > pipeline.max_text_length {
        return Err(PipelineError::InvalidMessage(format!(
            "text of {chars} characters exceeds limit of {}",
            pipeline.max_text_length
        )));
    }

    if message.attachments.len() > pipeline.max_attachments {
        return Err(PipelineError::InvalidMessage(format!(
            "{} attachments exceed limit of {}",
            message.attachments.len(),
            pipeline.max_attachments
        )));
    }

    for attachment in &message.attachments {
        if attachment.size_bytes > pipeline.max_attachment_bytes {
            return Err(PipelineError::InvalidMessage(format!(
                "attachment {} of {} bytes exceeds limit of {}",
                attachment.filename, attachment.size_bytes, pipeline.max_attachment_bytes
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attachment, GatewayKind};

    fn message(text: &str) -> InboundMessage {
        InboundMessage::new("chan", GatewayKind::Cli, text)
    }

    fn attachment(size_bytes: u64) -> Attachment {
        Attachment {
            filename: "photo.jpg".into(),
            content_type: "image/jpeg".into(),
            size_bytes,
            url: None,
        }
    }

    #[test]
    fn accepts_an_ordinary_message() {
        assert!(validate(
            &message("hello"),
            &PipelineConfig::default(),
            &SecurityConfig::default()
        )
        .is_ok());
    }

    #[test]
    fn rejects_empty_message_without_attachments() {
        let result = validate(
            &message("   "),
            &PipelineConfig::default(),
            &SecurityConfig::default(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidMessage(_))));

        // Empty text with an attachment is fine.
        let mut with_attachment = message("");
        with_attachment.attachments.push(attachment(1024));
        assert!(validate(
            &with_attachment,
            &PipelineConfig::default(),
            &SecurityConfig::default()
        )
        .is_ok());
    }

    #[test]
    fn rejects_oversized_text() {
        let config = PipelineConfig {
            max_text_length: 10,
            ..PipelineConfig::default()
        };
        let result = validate(&message("0123456789ab"), &config, &SecurityConfig::default());
        assert!(matches!(result, Err(PipelineError::InvalidMessage(_))));
    }

    #[test]
    fn rejects_too_many_or_too_large_attachments() {
        let config = PipelineConfig {
            max_attachments: 1,
            max_attachment_bytes: 1_000,
            ..PipelineConfig::default()
        };

        let mut too_many = message("see attached");
        too_many.attachments.push(attachment(10));
        too_many.attachments.push(attachment(10));
        assert!(validate(&too_many, &config, &SecurityConfig::default()).is_err());

        let mut too_large = message("see attached");
        too_large.attachments.push(attachment(2_000));
        assert!(validate(&too_large, &config, &SecurityConfig::default()).is_err());
    }

    #[test]
    fn rejects_blocked_user() {
        let security = SecurityConfig {
            blocked_users: vec!["spammer".into()],
            ..SecurityConfig::default()
        };
        let blocked = message("hi").with_user("spammer");
        assert!(validate(&blocked, &PipelineConfig::default(), &security).is_err());

        let fine = message("hi").with_user("regular");
        assert!(validate(&fine, &PipelineConfig::default(), &security).is_ok());
    }
}
