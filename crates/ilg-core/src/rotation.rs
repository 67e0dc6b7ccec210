//! One rotation of a linked pair's invite link.
//!
//! Order of operations: issue the new link, rewrite the anchor message (the
//! commit point), revoke the previous link, persist. At every moment the public
//! message points at a link that is still valid.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    domain::{PairKey, UserId},
    errors::Error,
    gateway::{GatewayError, PlatformGateway},
    locks::PairLocks,
    pair::LinkedPair,
    store::PairStore,
    template::render_anchor,
};

/// How the revoke step of a successful rotation went. Never fatal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// First rotation of the pair.
    NothingToRevoke,
    Revoked,
    AlreadyExpired,
    Failed(GatewayError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rotation {
    pub key: PairKey,
    pub link: String,
    pub rotated_at: DateTime<Utc>,
    pub revoke: RevokeOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("linked pair {0} not found")]
    NotFound(PairKey),

    #[error("linked pair {0} is no longer due")]
    NotDue(PairKey),

    #[error("failed to load linked pair: {0}")]
    Load(#[source] Error),

    #[error("failed to create invite link: {0}")]
    CreateLink(#[source] GatewayError),

    #[error("failed to update anchor message: {0}")]
    EditMessage(#[source] GatewayError),

    #[error("failed to save new invite link: {0}")]
    Persist(#[source] Error),
}

impl RotationError {
    /// The pair vanished or was rotated by someone else meanwhile; callers skip it.
    pub fn is_skip(&self) -> bool {
        matches!(self, RotationError::NotFound(_) | RotationError::NotDue(_))
    }

    pub fn is_structural(&self) -> bool {
        match self {
            RotationError::CreateLink(e) | RotationError::EditMessage(e) => e.is_structural(),
            _ => false,
        }
    }
}

/// Aggregate result of refreshing every pair of one owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct RotationExecutor {
    gateway: Arc<dyn PlatformGateway>,
    store: Arc<dyn PairStore>,
    locks: PairLocks,
    branding: String,
}

impl RotationExecutor {
    pub fn new(
        gateway: Arc<dyn PlatformGateway>,
        store: Arc<dyn PairStore>,
        branding: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            store,
            locks: PairLocks::default(),
            branding: branding.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PairStore> {
        &self.store
    }

    /// Perform one rotation attempt for `key`.
    ///
    /// Concurrent calls for the same pair run one after the other.
    pub async fn rotate(&self, key: PairKey) -> Result<Rotation, RotationError> {
        self.rotate_with(key, None).await
    }

    /// Like [`rotate`](Self::rotate), but only while the stored record is still
    /// due at `now`. The check runs under the pair lock against a fresh read.
    pub async fn rotate_if_due(
        &self,
        key: PairKey,
        now: DateTime<Utc>,
    ) -> Result<Rotation, RotationError> {
        self.rotate_with(key, Some(now)).await
    }

    async fn rotate_with(
        &self,
        key: PairKey,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<Rotation, RotationError> {
        let result = {
            let _guard = self.locks.lock_pair(key).await;
            self.rotate_locked(key, due_at).await
        };
        self.locks.prune().await;
        result
    }

    async fn rotate_locked(
        &self,
        key: PairKey,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<Rotation, RotationError> {
        let pair = self
            .store
            .get(key)
            .await
            .map_err(RotationError::Load)?
            .ok_or(RotationError::NotFound(key))?;

        if let Some(now) = due_at {
            if !pair.is_due(now) {
                return Err(RotationError::NotDue(key));
            }
        }

        let link = self
            .gateway
            .create_invite_link(pair.private_channel_id)
            .await
            .map_err(|e| {
                warn!(pair = %key, channel = pair.private_channel_id.0, error = %e, "invite link creation failed");
                RotationError::CreateLink(e)
            })?;
        debug!(pair = %key, channel = pair.private_channel_id.0, "created invite link");

        let now = Utc::now();
        let text = render_anchor(&link, now, &self.branding);
        match self
            .gateway
            .edit_message_text(pair.public_channel_id, pair.anchor_message_id, &text)
            .await
        {
            Ok(()) => {}
            Err(GatewayError::NotModified) => {
                debug!(pair = %key, "anchor message already up to date");
            }
            Err(e) => {
                warn!(
                    pair = %key,
                    channel = pair.public_channel_id.0,
                    message = pair.anchor_message_id.0,
                    error = %e,
                    "anchor message update failed; keeping previous link"
                );
                self.discard_unpublished(&pair, &link).await;
                return Err(RotationError::EditMessage(e));
            }
        }

        let revoke = self.revoke_previous(&pair, &link).await;

        self.store
            .update_invite_link(key, &link, now)
            .await
            .map_err(|e| {
                warn!(pair = %key, error = %e, "new invite link is live but could not be saved");
                RotationError::Persist(e)
            })?;

        info!(pair = %key, revoke = ?revoke, "invite link rotated");
        Ok(Rotation {
            key,
            link,
            rotated_at: now,
            revoke,
        })
    }

    async fn revoke_previous(&self, pair: &LinkedPair, new_link: &str) -> RevokeOutcome {
        let Some(old) = pair
            .current_invite_link
            .as_deref()
            .filter(|old| *old != new_link)
        else {
            return RevokeOutcome::NothingToRevoke;
        };

        match self
            .gateway
            .revoke_invite_link(pair.private_channel_id, old)
            .await
        {
            Ok(()) => RevokeOutcome::Revoked,
            Err(GatewayError::AlreadyExpired) => RevokeOutcome::AlreadyExpired,
            Err(e) => {
                warn!(
                    pair = %pair.key(),
                    channel = pair.private_channel_id.0,
                    error = %e,
                    "could not revoke previous invite link"
                );
                RevokeOutcome::Failed(e)
            }
        }
    }

    /// Best-effort revoke of a link that was created but never published.
    async fn discard_unpublished(&self, pair: &LinkedPair, link: &str) {
        if let Err(e) = self
            .gateway
            .revoke_invite_link(pair.private_channel_id, link)
            .await
        {
            debug!(pair = %pair.key(), error = %e, "unpublished invite link left to expire");
        }
    }

    /// Rotate every pair owned by `owner`, one after the other.
    pub async fn rotate_all_for_owner(&self, owner: UserId) -> crate::Result<RefreshSummary> {
        let pairs = self.store.list_for_owner(owner).await?;
        let mut summary = RefreshSummary::default();
        for pair in pairs {
            match self.rotate(pair.key()).await {
                Ok(_) => summary.succeeded += 1,
                Err(e) if e.is_skip() => {}
                Err(e) => {
                    warn!(pair = %pair.key(), error = %e, "manual refresh failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, MessageId},
        pair::{FailureReport, FailureUpdate, NewLinkedPair},
        retry::RetryPolicy,
        store::JsonStore,
        test_support::{pair_input, FakeGateway, PUBLIC, PRIVATE, OWNER, ANCHOR},
    };
    use async_trait::async_trait;
    use std::time::Duration;

    /// Reads from a real store; refuses to save a new link.
    struct ReadOnlyStore {
        inner: Arc<JsonStore>,
    }

    #[async_trait]
    impl PairStore for ReadOnlyStore {
        async fn upsert(
            &self,
            new: NewLinkedPair,
            now: DateTime<Utc>,
        ) -> crate::Result<LinkedPair> {
            self.inner.upsert(new, now).await
        }

        async fn delete(&self, key: PairKey) -> crate::Result<usize> {
            self.inner.delete(key).await
        }

        async fn list_for_owner(&self, owner: UserId) -> crate::Result<Vec<LinkedPair>> {
            self.inner.list_for_owner(owner).await
        }

        async fn get(&self, key: PairKey) -> crate::Result<Option<LinkedPair>> {
            self.inner.get(key).await
        }

        async fn update_invite_link(
            &self,
            _key: PairKey,
            _link: &str,
            _now: DateTime<Utc>,
        ) -> crate::Result<()> {
            Err(Error::External("read-only file system".to_string()))
        }

        async fn list_due(&self, now: DateTime<Utc>) -> crate::Result<Vec<LinkedPair>> {
            self.inner.list_due(now).await
        }

        async fn record_failure(
            &self,
            key: PairKey,
            report: FailureReport,
            policy: RetryPolicy,
        ) -> crate::Result<FailureUpdate> {
            self.inner.record_failure(key, report, policy).await
        }
    }

    const PERIOD: Duration = Duration::from_secs(12 * 3600);

    struct Harness {
        gateway: Arc<FakeGateway>,
        store: Arc<JsonStore>,
        executor: RotationExecutor,
        key: PairKey,
    }

    async fn harness() -> Harness {
        let gateway = Arc::new(FakeGateway::new());
        gateway.add_message(PUBLIC, ANCHOR);
        let store = Arc::new(JsonStore::in_memory(PERIOD).unwrap());
        let created = store
            .upsert(pair_input(), Utc::now() - chrono::Duration::hours(13))
            .await
            .unwrap();
        let executor = RotationExecutor::new(gateway.clone(), store.clone(), "Powered by @test");
        Harness {
            gateway,
            store,
            executor,
            key: created.key(),
        }
    }

    #[tokio::test]
    async fn first_rotation_publishes_and_persists_the_same_link() {
        let h = harness().await;
        let before = Utc::now();
        let rotation = h.executor.rotate(h.key).await.unwrap();

        assert_eq!(rotation.revoke, RevokeOutcome::NothingToRevoke);
        let shown = h.gateway.message_text(PUBLIC, ANCHOR).unwrap();
        assert!(shown.contains(&rotation.link));

        let rec = h.store.get(h.key).await.unwrap().unwrap();
        assert_eq!(rec.current_invite_link.as_deref(), Some(rotation.link.as_str()));
        let last = rec.last_rotated_at.unwrap();
        assert!(last >= before);
        assert_eq!(rec.next_rotation_at, last + chrono::Duration::hours(12));
        assert!(h.gateway.revoked_links().is_empty());
    }

    #[tokio::test]
    async fn second_rotation_revokes_previous_link() {
        let h = harness().await;
        let first = h.executor.rotate(h.key).await.unwrap();
        let second = h.executor.rotate(h.key).await.unwrap();

        assert_ne!(first.link, second.link);
        assert_eq!(second.revoke, RevokeOutcome::Revoked);
        assert_eq!(h.gateway.revoked_links(), vec![(PRIVATE, first.link)]);
    }

    #[tokio::test]
    async fn already_expired_revoke_still_succeeds() {
        let h = harness().await;
        let first = h.executor.rotate(h.key).await.unwrap();
        h.gateway
            .fail_revoke(&first.link, GatewayError::AlreadyExpired);

        let second = h.executor.rotate(h.key).await.unwrap();
        assert_eq!(second.revoke, RevokeOutcome::AlreadyExpired);
        let rec = h.store.get(h.key).await.unwrap().unwrap();
        assert_eq!(rec.current_invite_link, Some(second.link));
    }

    #[tokio::test]
    async fn other_revoke_failure_does_not_lose_published_link() {
        let h = harness().await;
        let first = h.executor.rotate(h.key).await.unwrap();
        h.gateway
            .fail_revoke(&first.link, GatewayError::Other("Bad Gateway".to_string()));

        let second = h.executor.rotate(h.key).await.unwrap();
        assert!(matches!(second.revoke, RevokeOutcome::Failed(_)));
        let rec = h.store.get(h.key).await.unwrap().unwrap();
        assert_eq!(rec.current_invite_link, Some(second.link));
    }

    #[tokio::test]
    async fn create_failure_leaves_record_untouched() {
        let h = harness().await;
        let before = h.store.get(h.key).await.unwrap().unwrap();
        h.gateway
            .fail_create(PRIVATE, GatewayError::AdminRequired);

        let err = h.executor.rotate(h.key).await.unwrap_err();
        assert!(matches!(err, RotationError::CreateLink(GatewayError::AdminRequired)));
        assert!(err.is_structural());
        assert_eq!(h.store.get(h.key).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn structural_edit_failure_discards_new_link_and_keeps_record() {
        let h = harness().await;
        let published = h.executor.rotate(h.key).await.unwrap();
        let before = h.store.get(h.key).await.unwrap().unwrap();
        h.gateway
            .fail_edit(PUBLIC, GatewayError::InvalidMessageId);

        let err = h.executor.rotate(h.key).await.unwrap_err();
        assert!(matches!(err, RotationError::EditMessage(GatewayError::InvalidMessageId)));

        assert_eq!(h.store.get(h.key).await.unwrap().unwrap(), before);
        let created = h.gateway.created_links();
        let orphan = created.last().map(|(_, l)| l.clone()).unwrap();
        assert_ne!(orphan, published.link);
        // The previous link stays live; only the unpublished one is revoked.
        assert_eq!(h.gateway.revoked_links(), vec![(PRIVATE, orphan)]);
    }

    #[tokio::test]
    async fn not_modified_edit_counts_as_success() {
        let h = harness().await;
        h.gateway.fail_edit(PUBLIC, GatewayError::NotModified);
        let rotation = h.executor.rotate(h.key).await.unwrap();
        let rec = h.store.get(h.key).await.unwrap().unwrap();
        assert_eq!(rec.current_invite_link, Some(rotation.link));
    }

    #[tokio::test]
    async fn identical_re_edit_reports_not_modified() {
        let h = harness().await;
        let text = "same text";
        h.gateway
            .edit_message_text(PUBLIC, ANCHOR, text)
            .await
            .unwrap();
        assert_eq!(
            h.gateway.edit_message_text(PUBLIC, ANCHOR, text).await,
            Err(GatewayError::NotModified)
        );
    }

    #[tokio::test]
    async fn failed_save_reports_error_after_publishing() {
        let h = harness().await;
        let before = h.store.get(h.key).await.unwrap().unwrap();
        let executor = RotationExecutor::new(
            h.gateway.clone(),
            Arc::new(ReadOnlyStore {
                inner: h.store.clone(),
            }),
            "Powered by @test",
        );

        let err = executor.rotate(h.key).await.unwrap_err();
        assert!(matches!(err, RotationError::Persist(_)));
        assert!(!err.is_skip());

        // The anchor already shows the new link; the record still has the old state.
        let created = h.gateway.created_links();
        assert_eq!(created.len(), 1);
        assert!(h
            .gateway
            .message_text(PUBLIC, ANCHOR)
            .unwrap()
            .contains(&created[0].1));
        assert_eq!(h.store.get(h.key).await.unwrap().unwrap(), before);
        assert!(h.gateway.revoked_links().is_empty());
    }

    #[tokio::test]
    async fn pair_rotated_meanwhile_is_not_due() {
        let h = harness().await;
        let now = Utc::now();
        h.store
            .update_invite_link(h.key, "https://t.me/+manual", now)
            .await
            .unwrap();

        let err = h.executor.rotate_if_due(h.key, now).await.unwrap_err();
        assert!(matches!(err, RotationError::NotDue(_)));
        assert!(err.is_skip());
        assert!(h.gateway.created_links().is_empty());

        let later = now + chrono::Duration::hours(13);
        let rotation = h.executor.rotate_if_due(h.key, later).await.unwrap();
        assert_eq!(
            h.gateway.revoked_links(),
            vec![(PRIVATE, "https://t.me/+manual".to_string())]
        );
        assert!(h
            .gateway
            .message_text(PUBLIC, ANCHOR)
            .unwrap()
            .contains(&rotation.link));
    }

    #[tokio::test]
    async fn missing_pair_is_a_skip() {
        let h = harness().await;
        let missing = PairKey::new(OWNER, ChatId(-999));
        let err = h.executor.rotate(missing).await.unwrap_err();
        assert!(err.is_skip());
        assert!(h.gateway.created_links().is_empty());
    }

    #[tokio::test]
    async fn overlapping_rotations_serialize_and_leave_no_orphan() {
        let h = harness().await;
        h.gateway.set_create_delay(Duration::from_millis(30));

        let (a, b) = tokio::join!(h.executor.rotate(h.key), h.executor.rotate(h.key));
        let (a, b) = (a.unwrap(), b.unwrap());

        let rec = h.store.get(h.key).await.unwrap().unwrap();
        let last = rec.current_invite_link.unwrap();
        let earlier = if last == a.link { b.link } else { a.link };
        assert_eq!(h.gateway.revoked_links(), vec![(PRIVATE, earlier)]);
        assert!(h.gateway.message_text(PUBLIC, ANCHOR).unwrap().contains(&last));
    }

    #[tokio::test]
    async fn refresh_all_counts_each_pair() {
        let h = harness().await;
        let broken = ChatId(-1003);
        h.gateway.add_message(broken, MessageId(5));
        h.gateway.fail_edit(broken, GatewayError::InvalidChannel);
        let mut second = pair_input();
        second.public_channel_id = broken;
        second.anchor_message_id = MessageId(5);
        h.store.upsert(second, Utc::now()).await.unwrap();

        let summary = h.executor.rotate_all_for_owner(OWNER).await.unwrap();
        assert_eq!(
            summary,
            RefreshSummary {
                succeeded: 1,
                failed: 1
            }
        );
    }
}
