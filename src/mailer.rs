//! Outbound mail for account flows (confirmation and reset links).

use std::sync::Mutex;
use url::Url;

/// A composed message, ready for delivery.
#[derive(Debug, Clone)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mail delivery failed. The flows that send mail report this to the
/// caller instead of pretending the message went out.
#[derive(Debug)]
pub struct MailError(pub String);

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to send mail: {}", self.0)
    }
}

impl std::error::Error for MailError {}

/// Delivery backend. Kept synchronous: backends either hand the message
/// to a local queue or, in tests, record it in memory.
pub trait Mailer: Send + Sync {
    fn deliver(&self, mail: Mail) -> Result<(), MailError>;

    fn send_verification(&self, base_url: &Url, to: &str, token: &str) -> Result<(), MailError> {
        self.deliver(confirmation_mail(base_url, to, token))
    }

    fn send_password_reset(&self, base_url: &Url, to: &str, token: &str) -> Result<(), MailError> {
        self.deliver(reset_mail(base_url, to, token))
    }
}

/// Writes the message to the log instead of delivering it. Default
/// backend for development deployments.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn deliver(&self, mail: Mail) -> Result<(), MailError> {
        tracing::info!(to = %mail.to, subject = %mail.subject, "outbound mail");
        tracing::debug!(body = %mail.body, "outbound mail body");
        Ok(())
    }
}

/// Records sent mail in memory, optionally failing every send.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Mail>>,
    fail: bool,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails, for exercising delivery-error paths.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Mailer for MemoryMailer {
    fn deliver(&self, mail: Mail) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError("simulated delivery failure".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(mail);
        }
        Ok(())
    }
}

fn action_link(base_url: &Url, path: &str, token: &str) -> String {
    let mut url = base_url.clone();
    url.set_path(path);
    url.set_query(Some(&format!("token={}", token)));
    url.to_string()
}

/// Compose the email-verification message.
pub fn confirmation_mail(base_url: &Url, to: &str, token: &str) -> Mail {
    let link = action_link(base_url, "/email/confirm", token);
    Mail {
        to: to.to_string(),
        subject: "Please confirm your email address".to_string(),
        body: format!(
            "Welcome! Please confirm your email address by visiting the link below \
             within the next hour.\n\n{}\n",
            link
        ),
    }
}

/// Compose the password-reset message.
pub fn reset_mail(base_url: &Url, to: &str, token: &str) -> Mail {
    let link = action_link(base_url, "/password/reset", token);
    Mail {
        to: to.to_string(),
        subject: "Password reset request".to_string(),
        body: format!(
            "A password reset was requested for your account. The link below is \
             valid for one hour. If you did not request this, you can ignore this \
             message.\n\n{}\n",
            link
        ),
    }
}
