use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::PairKey;

/// One async mutex per linked pair.
///
/// Held for the whole rotation so a scheduled run and a manual refresh of the
/// same pair serialize instead of racing on the anchor message.
#[derive(Default)]
pub struct PairLocks {
    inner: Mutex<HashMap<PairKey, Arc<Mutex<()>>>>,
}

impl PairLocks {
    pub async fn lock_pair(&self, key: PairKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop entries nobody is holding or waiting on.
    pub async fn prune(&self) {
        let mut map = self.inner.lock().await;
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, UserId};

    #[tokio::test]
    async fn distinct_pairs_do_not_block_each_other() {
        let locks = PairLocks::default();
        let a = locks.lock_pair(PairKey::new(UserId(1), ChatId(-1))).await;
        let b = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            locks.lock_pair(PairKey::new(UserId(1), ChatId(-2))),
        )
        .await;
        assert!(b.is_ok());
        drop(a);
    }

    #[tokio::test]
    async fn same_pair_waits_for_holder() {
        let locks = PairLocks::default();
        let key = PairKey::new(UserId(1), ChatId(-1));
        let held = locks.lock_pair(key).await;
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock_pair(key)).await;
        assert!(blocked.is_err());
        drop(held);
        let _again = locks.lock_pair(key).await;
    }

    #[tokio::test]
    async fn prune_keeps_held_entries() {
        let locks = PairLocks::default();
        let held = locks.lock_pair(PairKey::new(UserId(1), ChatId(-1))).await;
        drop(locks.lock_pair(PairKey::new(UserId(1), ChatId(-2))).await);
        locks.prune().await;
        assert_eq!(locks.tracked().await, 1);
        drop(held);
    }
}
