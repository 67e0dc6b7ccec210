use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChatId, MessageId, PairKey, UserId};

/// A public/private channel association owned by one user.
///
/// `current_invite_link` mirrors what the anchor message shows; it is only
/// written after the message edit succeeded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedPair {
    pub owner_id: UserId,
    pub public_channel_id: ChatId,
    pub private_channel_id: ChatId,
    pub anchor_message_id: MessageId,
    pub current_invite_link: Option<String>,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub next_rotation_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_failure: Option<String>,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub quarantined: bool,
}

impl LinkedPair {
    pub fn key(&self) -> PairKey {
        PairKey::new(self.owner_id, self.public_channel_id)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.quarantined && self.next_rotation_at <= now
    }
}

/// Validated input for creating (or re-adding) a linked pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewLinkedPair {
    pub owner_id: UserId,
    pub public_channel_id: ChatId,
    pub private_channel_id: ChatId,
    pub anchor_message_id: MessageId,
}

impl NewLinkedPair {
    pub fn key(&self) -> PairKey {
        PairKey::new(self.owner_id, self.public_channel_id)
    }
}

/// One failed rotation attempt as observed by the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureReport {
    pub reason: String,
    pub structural: bool,
    pub at: DateTime<Utc>,
}

/// Failure bookkeeping derived from the stored count and the retry policy.
///
/// Never touches the link or rotation timestamps except `next_rotation_at`
/// when the retry policy decides to back off.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureUpdate {
    pub consecutive_failures: u32,
    pub reason: String,
    pub at: DateTime<Utc>,
    pub next_rotation_at: Option<DateTime<Utc>>,
    pub quarantine: bool,
}
