use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ilg_core::{
    config::Config,
    gateway::PlatformGateway,
    onboarding::{Onboarding, SessionStore},
    rotation::RotationExecutor,
    scheduler::{DueSetScheduler, SchedulerConfig},
    store::{JsonStore, PairStore},
    template::default_branding,
    throttled::{ThrottleConfig, ThrottledGateway},
};

use crate::handlers;
use crate::TelegramGateway;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub gateway: Arc<dyn PlatformGateway>,
    pub store: Arc<dyn PairStore>,
    pub executor: Arc<RotationExecutor>,
    pub onboarding: Arc<Onboarding>,
    pub user_locks: Arc<UserLocks>,
}

impl AppState {
    pub fn rotation_hours(&self) -> u64 {
        (self.cfg.rotation_period.as_secs() / 3600).max(1)
    }
}

/// Serializes conversation input per operator so onboarding steps never race.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock_user(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let telegram = TelegramGateway::connect(bot.clone()).await?;
    let username = telegram.service_account().username.clone();
    info!(bot = %username, "invite link guard started");
    info!(
        allowed_users = cfg.telegram_allowed_users.len(),
        store = %cfg.store_path.display(),
        "configuration loaded"
    );

    // Throttle every platform call; the adapter still retries once on RetryAfter.
    let gateway: Arc<dyn PlatformGateway> = Arc::new(ThrottledGateway::new(
        Arc::new(telegram),
        ThrottleConfig::default(),
    ));
    let store: Arc<dyn PairStore> =
        Arc::new(JsonStore::open(cfg.store_path.clone(), cfg.rotation_period).await?);

    let branding = cfg
        .branding
        .clone()
        .unwrap_or_else(|| default_branding(&username));
    let executor = Arc::new(RotationExecutor::new(
        gateway.clone(),
        store.clone(),
        branding,
    ));
    let sessions = Arc::new(SessionStore::new(cfg.onboarding_ttl));
    let onboarding = Arc::new(Onboarding::new(
        gateway.clone(),
        store.clone(),
        sessions.clone(),
    ));

    let shutdown = CancellationToken::new();
    let scheduler = DueSetScheduler::new(
        SchedulerConfig {
            tick: cfg.scheduler_tick,
            pacing: cfg.rotation_pacing,
            retry: cfg.retry,
        },
        store.clone(),
        executor.clone(),
    );
    let scheduler_task = scheduler.start(shutdown.clone());
    let purge_task = spawn_session_purge(sessions, cfg.scheduler_tick, shutdown.clone());

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        gateway,
        store,
        executor,
        onboarding,
        user_locks: Arc::new(UserLocks::default()),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    shutdown.cancel();
    if let Err(e) = scheduler_task.await {
        warn!(error = %e, "scheduler task ended abnormally");
    }
    let _ = purge_task.await;
    info!("invite link guard stopped");

    Ok(())
}

fn spawn_session_purge(
    sessions: Arc<SessionStore>,
    every: std::time::Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                let purged = sessions.purge_expired().await;
                if purged > 0 {
                    info!(purged, "expired onboarding sessions dropped");
                }
              }
            }
        }
    })
}
