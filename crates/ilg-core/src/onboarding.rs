//! Conversational linking flow.
//!
//! `/add` walks the operator through: public channel → private channel →
//! anchor message id. `/remove` lists the operator's pairs and waits for a
//! number. Per-user progress lives in a [`SessionStore`] with TTL expiry.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use chrono::Utc;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    domain::{ChatId, MessageId, PairKey, UserId},
    eligibility::{self, ChannelRole, Ineligible},
    gateway::{ChatInfo, ChatKind, ChatRef, GatewayError, PlatformGateway},
    pair::{LinkedPair, NewLinkedPair},
    store::PairStore,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OnboardingState {
    AwaitingPublicChannel,
    AwaitingPrivateChannel {
        public: ChatInfo,
    },
    AwaitingAnchorMessage {
        public: ChatInfo,
        private: ChatInfo,
    },
    AwaitingRemoveSelection {
        pairs: Vec<PairKey>,
    },
}

#[derive(Debug)]
struct Session {
    state: OnboardingState,
    touched: Instant,
}

/// Per-user conversation state with inactivity expiry.
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<UserId, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set(&self, user: UserId, state: OnboardingState) {
        self.set_at(user, state, Instant::now()).await;
    }

    pub async fn set_at(&self, user: UserId, state: OnboardingState, now: Instant) {
        self.sessions.lock().await.insert(
            user,
            Session {
                state,
                touched: now,
            },
        );
    }

    pub async fn get(&self, user: UserId) -> Option<OnboardingState> {
        self.get_at(user, Instant::now()).await
    }

    /// Current state, or `None` if there is none or it has expired (expired
    /// sessions are dropped).
    pub async fn get_at(&self, user: UserId, now: Instant) -> Option<OnboardingState> {
        let mut sessions = self.sessions.lock().await;
        let expired = sessions
            .get(&user)
            .map(|s| now.saturating_duration_since(s.touched) > self.ttl)?;
        if expired {
            sessions.remove(&user);
            return None;
        }
        sessions.get(&user).map(|s| s.state.clone())
    }

    pub async fn clear(&self, user: UserId) -> bool {
        self.sessions.lock().await.remove(&user).is_some()
    }

    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now()).await
    }

    pub async fn purge_expired_at(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_duration_since(s.touched) <= self.ttl);
        before - sessions.len()
    }
}

/// What the operator sent while a session is open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversationInput {
    /// A post forwarded from a channel.
    ForwardedFromChannel(ChatId),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// No open session; the input is not for us.
    Ignored,
    ChannelNotRecognized {
        role: ChannelRole,
    },
    /// The platform could not be asked about the channel; worth resending.
    ChannelLookupFailed {
        role: ChannelRole,
    },
    SameChannel,
    Ineligible {
        role: ChannelRole,
        why: Ineligible,
    },
    PublicAccepted {
        public: ChatInfo,
    },
    PrivateAccepted {
        private: ChatInfo,
    },
    InvalidMessageId,
    MessageNotFound,
    /// Store write failed; the session is closed.
    LinkFailed,
    Linked {
        pair: LinkedPair,
        public: ChatInfo,
        private: ChatInfo,
    },
    InvalidSelection {
        max: usize,
    },
    Removed {
        key: PairKey,
    },
    RemoveFailed,
}

pub struct Onboarding {
    gateway: Arc<dyn PlatformGateway>,
    store: Arc<dyn PairStore>,
    sessions: Arc<SessionStore>,
}

impl Onboarding {
    pub fn new(
        gateway: Arc<dyn PlatformGateway>,
        store: Arc<dyn PairStore>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            gateway,
            store,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub async fn begin_link(&self, user: UserId) {
        self.sessions
            .set(user, OnboardingState::AwaitingPublicChannel)
            .await;
    }

    /// Start the numbered unlink flow. Returns the pairs in display order; no
    /// session is opened when there is nothing to remove.
    pub async fn begin_remove(&self, user: UserId) -> Result<Vec<LinkedPair>> {
        let pairs = self.store.list_for_owner(user).await?;
        if !pairs.is_empty() {
            let keys = pairs.iter().map(LinkedPair::key).collect();
            self.sessions
                .set(user, OnboardingState::AwaitingRemoveSelection { pairs: keys })
                .await;
        }
        Ok(pairs)
    }

    pub async fn cancel(&self, user: UserId) -> bool {
        self.sessions.clear(user).await
    }

    pub async fn handle(&self, user: UserId, input: ConversationInput) -> Reply {
        let Some(state) = self.sessions.get(user).await else {
            return Reply::Ignored;
        };

        match state {
            OnboardingState::AwaitingPublicChannel => {
                let public = match self
                    .resolve_eligible_channel(user, &input, ChannelRole::Public)
                    .await
                {
                    Ok(c) => c,
                    Err(reply) => return reply,
                };
                self.sessions
                    .set(
                        user,
                        OnboardingState::AwaitingPrivateChannel {
                            public: public.clone(),
                        },
                    )
                    .await;
                Reply::PublicAccepted { public }
            }
            OnboardingState::AwaitingPrivateChannel { public } => {
                let private = match self
                    .resolve_eligible_channel(user, &input, ChannelRole::Private)
                    .await
                {
                    Ok(c) => c,
                    Err(reply) => return reply,
                };
                if private.id == public.id {
                    return Reply::SameChannel;
                }
                self.sessions
                    .set(
                        user,
                        OnboardingState::AwaitingAnchorMessage {
                            public,
                            private: private.clone(),
                        },
                    )
                    .await;
                Reply::PrivateAccepted { private }
            }
            OnboardingState::AwaitingAnchorMessage { public, private } => {
                self.link(user, &input, public, private).await
            }
            OnboardingState::AwaitingRemoveSelection { pairs } => {
                self.remove_selected(user, &input, &pairs).await
            }
        }
    }

    async fn resolve_eligible_channel(
        &self,
        user: UserId,
        input: &ConversationInput,
        role: ChannelRole,
    ) -> std::result::Result<ChatInfo, Reply> {
        let chat_ref = match input {
            ConversationInput::ForwardedFromChannel(id) => Some(ChatRef::Id(*id)),
            ConversationInput::Text(text) => parse_chat_ref(text),
        };
        let Some(chat_ref) = chat_ref else {
            return Err(Reply::ChannelNotRecognized { role });
        };

        let chat = match self.gateway.get_chat(&chat_ref).await {
            Ok(c) if c.kind == ChatKind::Channel => c,
            Ok(_) => return Err(Reply::ChannelNotRecognized { role }),
            Err(GatewayError::Other(e)) => {
                warn!(user = user.0, error = %e, "channel lookup failed");
                return Err(Reply::ChannelLookupFailed { role });
            }
            Err(_) => return Err(Reply::ChannelNotRecognized { role }),
        };

        eligibility::check(self.gateway.as_ref(), chat.id, user, role)
            .await
            .map_err(|why| Reply::Ineligible { role, why })?;
        Ok(chat)
    }

    async fn link(
        &self,
        user: UserId,
        input: &ConversationInput,
        public: ChatInfo,
        private: ChatInfo,
    ) -> Reply {
        let ConversationInput::Text(text) = input else {
            return Reply::InvalidMessageId;
        };
        let Some(message) = parse_message_id(text) else {
            return Reply::InvalidMessageId;
        };

        match self.gateway.message_exists(public.id, message).await {
            Ok(true) => {}
            Ok(false) => return Reply::MessageNotFound,
            Err(e) => {
                warn!(channel = public.id.0, message = message.0, error = %e, "anchor message lookup failed");
                return Reply::MessageNotFound;
            }
        }

        self.sessions.clear(user).await;
        let new = NewLinkedPair {
            owner_id: user,
            public_channel_id: public.id,
            private_channel_id: private.id,
            anchor_message_id: message,
        };
        match self.store.upsert(new, Utc::now()).await {
            Ok(pair) => {
                info!(pair = %pair.key(), private = private.id.0, "channels linked");
                Reply::Linked {
                    pair,
                    public,
                    private,
                }
            }
            Err(e) => {
                warn!(owner = user.0, error = %e, "failed to save linked pair");
                Reply::LinkFailed
            }
        }
    }

    async fn remove_selected(
        &self,
        user: UserId,
        input: &ConversationInput,
        pairs: &[PairKey],
    ) -> Reply {
        let selection = match input {
            ConversationInput::Text(t) => t.trim().parse::<usize>().ok(),
            ConversationInput::ForwardedFromChannel(_) => None,
        };
        let Some(key) = selection
            .filter(|n| *n >= 1)
            .and_then(|n| pairs.get(n - 1))
            .copied()
        else {
            return Reply::InvalidSelection { max: pairs.len() };
        };

        self.sessions.clear(user).await;
        match self.store.delete(key).await {
            Ok(n) if n > 0 => {
                info!(pair = %key, "channels unlinked");
                Reply::Removed { key }
            }
            Ok(_) => Reply::RemoveFailed,
            Err(e) => {
                warn!(pair = %key, error = %e, "failed to remove linked pair");
                Reply::RemoveFailed
            }
        }
    }
}

fn username_link_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:https?://)?(?:t\.me|telegram\.me)/([A-Za-z][A-Za-z0-9_]{3,31})/?$").ok()
    })
    .as_ref()
}

fn message_link_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:https?://)?(?:t\.me|telegram\.me)/(?:c/)?[A-Za-z0-9_]+/(\d+)/?(?:\?.*)?$")
            .ok()
    })
    .as_ref()
}

fn is_username(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (5..=32).contains(&s.len())
        && first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse a human channel reference: numeric id, `@name`, bare `name`, or a
/// `t.me/name` link. Invite links (`t.me/+…`, `joinchat`) are not references.
pub fn parse_chat_ref(text: &str) -> Option<ChatRef> {
    let text = text.trim();
    if let Ok(id) = text.parse::<i64>() {
        return Some(ChatRef::Id(ChatId(id)));
    }

    if let Some(name) = text.strip_prefix('@') {
        return is_username(name).then(|| ChatRef::Username(name.to_string()));
    }

    if let Some(caps) = username_link_re().and_then(|re| re.captures(text)) {
        let name = caps.get(1)?.as_str();
        if name.eq_ignore_ascii_case("joinchat") {
            return None;
        }
        return Some(ChatRef::Username(name.to_string()));
    }

    is_username(text).then(|| ChatRef::Username(text.to_string()))
}

/// Parse an anchor message reference: a positive id or a `t.me/<chan>/<id>` link.
pub fn parse_message_id(text: &str) -> Option<MessageId> {
    let text = text.trim();
    let digits = match message_link_re().and_then(|re| re.captures(text)) {
        Some(caps) => caps.get(1)?.as_str(),
        None => text,
    };
    digits
        .parse::<i32>()
        .ok()
        .filter(|id| *id > 0)
        .map(MessageId)
}
