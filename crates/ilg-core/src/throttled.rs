use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageId, UserId},
    gateway::{ChatInfo, ChatRef, GatewayResult, MemberInfo, PlatformGateway, ServiceAccount},
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* platform API calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls touching the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),    // ~25/sec
            per_chat_min_interval: Duration::from_millis(350), // ~3/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// PlatformGateway decorator that spaces outbound calls.
///
/// The scheduler and the command handlers share one gateway, so a manual
/// "refresh all" during a scheduler tick still stays under Telegram's limits.
pub struct ThrottledGateway {
    inner: Arc<dyn PlatformGateway>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<i64, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledGateway {
    pub fn new(inner: Arc<dyn PlatformGateway>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(chat_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, chat_id: i64) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat_id).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl PlatformGateway for ThrottledGateway {
    fn service_account(&self) -> &ServiceAccount {
        self.inner.service_account()
    }

    async fn create_invite_link(&self, channel: ChatId) -> GatewayResult<String> {
        self.throttle_chat(channel.0).await;
        self.inner.create_invite_link(channel).await
    }

    async fn revoke_invite_link(&self, channel: ChatId, link: &str) -> GatewayResult<()> {
        self.throttle_chat(channel.0).await;
        self.inner.revoke_invite_link(channel, link).await
    }

    async fn edit_message_text(
        &self,
        channel: ChatId,
        message: MessageId,
        html: &str,
    ) -> GatewayResult<()> {
        self.throttle_chat(channel.0).await;
        self.inner.edit_message_text(channel, message, html).await
    }

    async fn get_chat_member(&self, chat: ChatId, user: UserId) -> GatewayResult<MemberInfo> {
        self.throttle_chat(chat.0).await;
        self.inner.get_chat_member(chat, user).await
    }

    async fn get_chat(&self, chat: &ChatRef) -> GatewayResult<ChatInfo> {
        match chat {
            ChatRef::Id(id) => self.throttle_chat(id.0).await,
            // Unknown chat until resolved; global spacing only.
            ChatRef::Username(_) => self.throttle_global().await,
        }
        self.inner.get_chat(chat).await
    }

    async fn message_exists(&self, chat: ChatId, message: MessageId) -> GatewayResult<bool> {
        self.throttle_chat(chat.0).await;
        self.inner.message_exists(chat, message).await
    }
}
