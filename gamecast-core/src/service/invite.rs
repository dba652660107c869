//! Share-link invitations
//!
//! Sending invites is a side channel of session creation. The relay only
//! needs something that can deliver a text message to a phone number; the
//! default implementation writes it to the log.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Build the invite text for a share link.
#[must_use]
pub fn invite_message(share_url: &str) -> String {
    format!("You have been invited to follow a live game: {share_url}")
}

/// Mask a phone number for logging, keeping only the last four digits
fn mask_recipient(recipient: &str) -> String {
    let chars: Vec<char> = recipient.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{tail}")
}

/// Outcome of a bulk send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub sent: Vec<String>,
    /// Recipient and the reason it failed
    pub failed: Vec<(String, String)>,
}

impl BulkReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[async_trait]
pub trait InviteNotifier: Send + Sync {
    async fn send(&self, recipient: &str, message: &str) -> Result<()>;

    /// Send to every recipient in turn, collecting failures instead of stopping.
    async fn send_bulk(&self, recipients: &[String], message: &str) -> BulkReport {
        let mut report = BulkReport::default();
        for recipient in recipients {
            match self.send(recipient, message).await {
                Ok(()) => report.sent.push(recipient.clone()),
                Err(e) => {
                    warn!(recipient = %mask_recipient(recipient), error = %e, "Failed to send invite");
                    report.failed.push((recipient.clone(), e.to_string()));
                }
            }
        }
        report
    }
}

/// Notifier that only logs what it would send
#[derive(Debug, Clone, Copy, Default)]
pub struct LogInviteNotifier;

#[async_trait]
impl InviteNotifier for LogInviteNotifier {
    async fn send(&self, recipient: &str, message: &str) -> Result<()> {
        if recipient.trim().is_empty() {
            return Err(Error::InvalidInput("Recipient is empty".to_string()));
        }
        info!(recipient = %mask_recipient(recipient), message, "Invite (log only)");
        Ok(())
    }
}
