//! Mail - Outbound Notifications
//!
//! TigerStyle: Plain-text messages, fire-and-forget delivery, logged outcomes.
//!
//! Delivery never blocks a request: [`dispatch`] spawns a detached task and
//! failures only reach the log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// SendGrid v3 send endpoint
pub const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Display name on outgoing mail
pub const SENDER_NAME: &str = "Arcasys System";

/// Maximum subject length in bytes
pub const MAIL_SUBJECT_BYTES_MAX: usize = 998;

/// Request timeout for the mail API
pub const MAIL_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail request failed: {0}")]
    Request(String),

    #[error("mail API returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// One plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    #[must_use]
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        let message = Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        };
        assert!(!message.to.is_empty(), "recipient cannot be empty");
        assert!(
            message.subject.len() <= MAIL_SUBJECT_BYTES_MAX,
            "subject {} bytes exceeds max {}",
            message.subject.len(),
            MAIL_SUBJECT_BYTES_MAX
        );
        message
    }
}

/// Something that can deliver an [`EmailMessage`].
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Send `message` on a detached task. Failures are logged, never returned.
pub fn dispatch(mailer: Arc<dyn Mailer>, message: EmailMessage) -> JoinHandle<()> {
    tokio::spawn(async move {
        match mailer.send(&message).await {
            Ok(()) => tracing::info!(to = %message.to, subject = %message.subject, "email sent"),
            Err(e) => tracing::error!(to = %message.to, error = %e, "email failed"),
        }
    })
}

// =============================================================================
// SendGridMailer
// =============================================================================

/// Delivers through the SendGrid v3 HTTP API.
pub struct SendGridMailer {
    api_key: String,
    from_email: String,
    endpoint: String,
    client: reqwest::Client,
}

impl SendGridMailer {
    pub fn new(api_key: String, from_email: String) -> Result<Self, MailError> {
        Self::with_endpoint(api_key, from_email, SENDGRID_SEND_URL.to_string())
    }

    /// Point at a different endpoint (tests, proxies).
    pub fn with_endpoint(
        api_key: String,
        from_email: String,
        endpoint: String,
    ) -> Result<Self, MailError> {
        assert!(!api_key.is_empty(), "api key cannot be empty");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(MAIL_TIMEOUT_SECS))
            .build()
            .map_err(|e| MailError::Request(e.to_string()))?;

        Ok(Self {
            api_key,
            from_email,
            endpoint,
            client,
        })
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let payload = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": self.from_email, "name": SENDER_NAME },
            "subject": message.subject,
            "content": [{ "type": "text/plain", "value": message.body }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

// =============================================================================
// LogMailer / RecordingMailer
// =============================================================================

/// Writes messages to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "mail delivery not configured, message body follows\n{}",
            message.body
        );
        Ok(())
    }
}

/// Keeps every message in memory. For tests.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    notify: Notify,
}

impl RecordingMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }

    /// Wait until at least `count` messages arrived or `timeout` passes.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<EmailMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            {
                let sent = self.sent.lock().await;
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.sent().await;
            }
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        self.sent.lock().await.push(message.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Sent right after self-registration.
#[must_use]
pub fn registration_received(to: &str, first_name: &str) -> EmailMessage {
    EmailMessage::new(
        to,
        "Account Registration Received - Marketing Archive",
        format!(
            "Hello {first_name},\n\n\
             Your staff account has been created successfully and is pending administrator approval.\n\n\
             You will receive another email once your account has been approved.\n\n\
             Best regards,\n\
             Marketing Archive Team"
        ),
    )
}

#[must_use]
pub fn account_approved(to: &str, user_name: &str, login_url: &str) -> EmailMessage {
    EmailMessage::new(
        to,
        "Arcasys System - Account Approved",
        format!(
            "Arcasys System - Account Approved\n\n\
             Dear {user_name},\n\n\
             Your staff account has been approved.\n\n\
             You can now login to the system.\n\n\
             Login: {login_url}\n\n\
             This is an automated message from the Arcasys System."
        ),
    )
}

#[must_use]
pub fn application_rejected(to: &str, user_name: &str) -> EmailMessage {
    EmailMessage::new(
        to,
        "Arcasys System - Application Status",
        format!(
            "Arcasys System - Application Status\n\n\
             Dear {user_name},\n\n\
             Your account application could not be approved at this time.\n\n\
             Please contact the system administrator if you have questions.\n\n\
             This is an automated message from the Arcasys System."
        ),
    )
}

/// Reply to a reset request from an account still awaiting approval.
/// `registered_on` is already formatted, e.g. `June 01, 2025`.
#[must_use]
pub fn pending_reset_notice(to: &str, user_name: &str, registered_on: &str) -> EmailMessage {
    EmailMessage::new(
        to,
        "Password Reset Request - Pending Account - Marketing Archive",
        format!(
            "Hello {user_name},\n\n\
             You requested a password reset for your Marketing Archive staff account.\n\n\
             ACCOUNT STATUS: PENDING APPROVAL\n\
             Your account is still waiting for administrator approval. You cannot reset your password until your account is approved.\n\n\
             Your account registration was received on {registered_on} and is currently awaiting administrator approval.\n\n\
             Once your account is approved, you will receive an approval email and will be able to use the regular password reset feature.\n\n\
             Please try again after your account has been approved.\n\n\
             Best regards,\n\
             Marketing Archive Team"
        ),
    )
}

#[must_use]
pub fn password_reset_link(to: &str, user_name: &str, reset_url: &str) -> EmailMessage {
    EmailMessage::new(
        to,
        "Password Reset Request - Marketing Archive",
        format!(
            "Hello {user_name},\n\n\
             We received a request to reset the password for your Marketing Archive account.\n\n\
             Reset your password: {reset_url}\n\n\
             If you did not request this, you can ignore this email.\n\n\
             Best regards,\n\
             Marketing Archive Team"
        ),
    )
}
