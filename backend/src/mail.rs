use thiserror::Error;

/// One per-giver notification produced by a draw: tells `to_name` who
/// they are gifting, without leaking the rest of the assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftMessage {
    pub to_name: String,
    pub to_email: String,
    pub recipient_name: String,
    pub room_name: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("delivery to {to} failed: {reason}")]
    Delivery { to: String, reason: String },
}

pub trait Mailer: Send + Sync {
    fn send(&self, message: &GiftMessage) -> Result<(), MailError>;
}

/// Logs each dispatch instead of talking to an SMTP relay.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &GiftMessage) -> Result<(), MailError> {
        tracing::info!(
            to = %message.to_email,
            room = %message.room_name,
            "sending draw result to {}: you are gifting {}",
            message.to_name,
            message.recipient_name
        );
        Ok(())
    }
}

#[cfg(test)]
pub struct RecordingMailer {
    pub sent: std::sync::Mutex<Vec<GiftMessage>>,
    fail_for: Option<String>,
}

#[cfg(test)]
impl RecordingMailer {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail_for: None,
        }
    }

    /// Every send addressed to `email` fails; the rest are recorded.
    pub fn failing_for(email: impl Into<String>) -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail_for: Some(email.into()),
        }
    }
}

#[cfg(test)]
impl Mailer for RecordingMailer {
    fn send(&self, message: &GiftMessage) -> Result<(), MailError> {
        if self.fail_for.as_deref() == Some(message.to_email.as_str()) {
            return Err(MailError::Delivery {
                to: message.to_email.clone(),
                reason: "simulated failure".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
