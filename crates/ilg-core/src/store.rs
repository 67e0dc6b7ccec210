//! Linked-pair persistence.
//!
//! `JsonStore` keeps every record in memory and rewrites a JSON snapshot after
//! each mutation (temp file + rename). With no path it is memory-only, which is
//! what the tests use.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    domain::{PairKey, UserId},
    errors::Error,
    pair::{FailureReport, FailureUpdate, LinkedPair, NewLinkedPair},
    retry::RetryPolicy,
    Result,
};

/// Persistent CRUD over linked pairs, keyed by (owner, public channel).
///
/// Implementations must be safe to share between the scheduler and the command
/// handlers; every method is atomic per record.
#[async_trait]
pub trait PairStore: Send + Sync {
    /// Insert, or overwrite in place when the key already exists.
    async fn upsert(&self, new: NewLinkedPair, now: DateTime<Utc>) -> Result<LinkedPair>;

    /// Number of removed records (0 or 1).
    async fn delete(&self, key: PairKey) -> Result<usize>;

    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<LinkedPair>>;

    async fn get(&self, key: PairKey) -> Result<Option<LinkedPair>>;

    /// Record a successful rotation: sets the link, `last_rotated_at = now`,
    /// `next_rotation_at = now + period` and clears failure tracking.
    async fn update_invite_link(&self, key: PairKey, link: &str, now: DateTime<Utc>)
        -> Result<()>;

    /// Non-quarantined records with `next_rotation_at <= now`.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<LinkedPair>>;

    /// Count one more consecutive failure on the stored record and apply the
    /// policy's backoff/quarantine decision to it. Returns what was written.
    async fn record_failure(
        &self,
        key: PairKey,
        report: FailureReport,
        policy: RetryPolicy,
    ) -> Result<FailureUpdate>;
}

pub struct JsonStore {
    path: Option<PathBuf>,
    rotation_period: chrono::Duration,
    pairs: Mutex<BTreeMap<PairKey, LinkedPair>>,
}

impl JsonStore {
    /// Open (or create) the store file at `path`.
    pub async fn open(path: impl Into<PathBuf>, rotation_period: Duration) -> Result<Self> {
        let path = path.into();
        let pairs = load_snapshot(&path).await?;
        tracing::info!(path = %path.display(), records = pairs.len(), "linked-pair store opened");
        Ok(Self {
            path: Some(path),
            rotation_period: to_chrono(rotation_period)?,
            pairs: Mutex::new(pairs),
        })
    }

    pub fn in_memory(rotation_period: Duration) -> Result<Self> {
        Ok(Self {
            path: None,
            rotation_period: to_chrono(rotation_period)?,
            pairs: Mutex::new(BTreeMap::new()),
        })
    }

    async fn persist(&self, pairs: &BTreeMap<PairKey, LinkedPair>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let records: Vec<&LinkedPair> = pairs.values().collect();
        let txt = serde_json::to_string_pretty(&records)?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, txt).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Apply `f` to a copy of the map and only commit it once the snapshot
    /// is on disk, so a failed write leaves memory and file in agreement.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<PairKey, LinkedPair>) -> Result<T> + Send,
    ) -> Result<T>
    where
        T: Send,
    {
        let mut guard = self.pairs.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }
}

#[async_trait]
impl PairStore for JsonStore {
    async fn upsert(&self, new: NewLinkedPair, now: DateTime<Utc>) -> Result<LinkedPair> {
        let period = self.rotation_period;
        self.mutate(move |pairs| {
            let previous = pairs.get(&new.key());
            let created_at = previous.map(|p| p.created_at).unwrap_or(now);
            // The old link is only worth keeping if it belongs to the same private
            // channel; the next rotation revokes it there.
            let current_invite_link = previous
                .filter(|p| p.private_channel_id == new.private_channel_id)
                .and_then(|p| p.current_invite_link.clone());
            let last_rotated_at = previous
                .filter(|p| p.private_channel_id == new.private_channel_id)
                .and_then(|p| p.last_rotated_at);

            let record = LinkedPair {
                owner_id: new.owner_id,
                public_channel_id: new.public_channel_id,
                private_channel_id: new.private_channel_id,
                anchor_message_id: new.anchor_message_id,
                current_invite_link,
                last_rotated_at,
                next_rotation_at: now + period,
                created_at,
                updated_at: now,
                consecutive_failures: 0,
                last_failure: None,
                last_failure_at: None,
                quarantined: false,
            };
            pairs.insert(new.key(), record.clone());
            Ok(record)
        })
        .await
    }

    async fn delete(&self, key: PairKey) -> Result<usize> {
        self.mutate(move |pairs| Ok(usize::from(pairs.remove(&key).is_some())))
            .await
    }

    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<LinkedPair>> {
        let pairs = self.pairs.lock().await;
        Ok(pairs
            .values()
            .filter(|p| p.owner_id == owner)
            .cloned()
            .collect())
    }

    async fn get(&self, key: PairKey) -> Result<Option<LinkedPair>> {
        Ok(self.pairs.lock().await.get(&key).cloned())
    }

    async fn update_invite_link(
        &self,
        key: PairKey,
        link: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let period = self.rotation_period;
        let link = link.to_string();
        self.mutate(move |pairs| {
            let pair = pairs.get_mut(&key).ok_or(not_found(key))?;
            pair.current_invite_link = Some(link);
            pair.last_rotated_at = Some(now);
            pair.next_rotation_at = now + period;
            pair.updated_at = now;
            pair.consecutive_failures = 0;
            pair.last_failure = None;
            pair.last_failure_at = None;
            pair.quarantined = false;
            Ok(())
        })
        .await
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<LinkedPair>> {
        let pairs = self.pairs.lock().await;
        let mut due: Vec<LinkedPair> = pairs.values().filter(|p| p.is_due(now)).cloned().collect();
        due.sort_by_key(|p| p.next_rotation_at);
        Ok(due)
    }

    async fn record_failure(
        &self,
        key: PairKey,
        report: FailureReport,
        policy: RetryPolicy,
    ) -> Result<FailureUpdate> {
        self.mutate(move |pairs| {
            let pair = pairs.get_mut(&key).ok_or(not_found(key))?;
            let update = policy.on_failure(
                pair.consecutive_failures,
                report.structural,
                report.reason,
                report.at,
            );
            pair.consecutive_failures = update.consecutive_failures;
            pair.last_failure = Some(update.reason.clone());
            pair.last_failure_at = Some(update.at);
            pair.updated_at = update.at;
            if let Some(next) = update.next_rotation_at {
                pair.next_rotation_at = next;
            }
            if update.quarantine {
                pair.quarantined = true;
            }
            Ok(update)
        })
        .await
    }
}

fn not_found(key: PairKey) -> Error {
    Error::NotFound {
        owner: key.owner.0,
        channel: key.public_channel.0,
    }
}

fn to_chrono(d: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(d)
        .map_err(|e| Error::Config(format!("rotation period out of range: {e}")))
}

async fn load_snapshot(path: &Path) -> Result<BTreeMap<PairKey, LinkedPair>> {
    let txt = match tokio::fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    if txt.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let records: Vec<LinkedPair> = serde_json::from_str(&txt)?;
    Ok(records.into_iter().map(|p| (p.key(), p)).collect())
}
