use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// One CSV attachment pulled from a labeled email.
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    /// When the carrying email arrived, if the mailbox reports it.
    pub message_date: Option<DateTime<Utc>>,
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum MailboxError {
    /// Credentials invalid or expired. Requires interactive re-login;
    /// never retried automatically.
    #[error("mailbox authentication failed: {0}")]
    Auth(String),
    /// Transient failure reaching the mailbox. The sync driver retries
    /// with backoff; the client itself does not.
    #[error("mailbox fetch failed: {0}")]
    Fetch(String),
}

/// Source of labeled-email CSV attachments (Gmail in production).
pub trait MailboxSource: Send + Sync {
    /// All CSV attachments on emails carrying `label` received on or
    /// after `since`, in mailbox order.
    fn fetch_attachments(
        &self,
        label: &str,
        since: NaiveDate,
    ) -> Result<Vec<EmailAttachment>, MailboxError>;
}
