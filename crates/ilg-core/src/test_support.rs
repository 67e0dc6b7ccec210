//! In-memory gateway fake shared by the core tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, UserId},
    gateway::{
        ChatInfo, ChatKind, ChatRef, GatewayError, GatewayResult, MemberInfo, MemberRole,
        PlatformGateway, ServiceAccount,
    },
    pair::NewLinkedPair,
};

pub const OWNER: UserId = UserId(42);
pub const BOT: UserId = UserId(4242);
pub const PUBLIC: ChatId = ChatId(-1001);
pub const PRIVATE: ChatId = ChatId(-1002);
pub const ANCHOR: MessageId = MessageId(17);

pub fn pair_input() -> NewLinkedPair {
    NewLinkedPair {
        owner_id: OWNER,
        public_channel_id: PUBLIC,
        private_channel_id: PRIVATE,
        anchor_message_id: ANCHOR,
    }
}

pub fn admin(can_edit_messages: bool, can_invite_users: bool) -> MemberInfo {
    MemberInfo {
        role: MemberRole::Administrator,
        can_edit_messages,
        can_invite_users,
    }
}

#[derive(Default)]
struct FakeState {
    next_link: u32,
    created: Vec<(ChatId, String)>,
    revoked: Vec<(ChatId, String)>,
    messages: HashMap<(ChatId, MessageId), String>,
    create_failures: HashMap<ChatId, GatewayError>,
    edit_failures: HashMap<ChatId, GatewayError>,
    revoke_failures: HashMap<String, GatewayError>,
    members: HashMap<(ChatId, UserId), MemberInfo>,
    member_lookup_failures: HashSet<ChatId>,
    chat_lookup_failures: HashSet<ChatId>,
    chats: HashMap<ChatId, ChatInfo>,
    usernames: HashMap<String, ChatId>,
    create_delay: Option<Duration>,
}

pub struct FakeGateway {
    account: ServiceAccount,
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            account: ServiceAccount {
                id: BOT,
                username: "test_guard_bot".to_string(),
            },
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn add_message(&self, chat: ChatId, message: MessageId) {
        self.state
            .lock()
            .unwrap()
            .messages
            .insert((chat, message), String::new());
    }

    pub fn add_chat(&self, id: ChatId, title: &str, kind: ChatKind, username: Option<&str>) {
        let mut st = self.state.lock().unwrap();
        st.chats.insert(
            id,
            ChatInfo {
                id,
                title: Some(title.to_string()),
                kind,
            },
        );
        if let Some(name) = username {
            st.usernames.insert(name.to_lowercase(), id);
        }
    }

    pub fn set_member(&self, chat: ChatId, user: UserId, info: MemberInfo) {
        self.state
            .lock()
            .unwrap()
            .members
            .insert((chat, user), info);
    }

    pub fn fail_member_lookup(&self, chat: ChatId) {
        self.state
            .lock()
            .unwrap()
            .member_lookup_failures
            .insert(chat);
    }

    pub fn fail_chat_lookup(&self, chat: ChatId) {
        self.state
            .lock()
            .unwrap()
            .chat_lookup_failures
            .insert(chat);
    }

    pub fn fail_create(&self, channel: ChatId, err: GatewayError) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .insert(channel, err);
    }

    pub fn clear_create_failure(&self, channel: ChatId) {
        self.state.lock().unwrap().create_failures.remove(&channel);
    }

    pub fn fail_edit(&self, channel: ChatId, err: GatewayError) {
        self.state
            .lock()
            .unwrap()
            .edit_failures
            .insert(channel, err);
    }

    pub fn fail_revoke(&self, link: &str, err: GatewayError) {
        self.state
            .lock()
            .unwrap()
            .revoke_failures
            .insert(link.to_string(), err);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.state.lock().unwrap().create_delay = Some(delay);
    }

    pub fn created_links(&self) -> Vec<(ChatId, String)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn revoked_links(&self) -> Vec<(ChatId, String)> {
        self.state.lock().unwrap().revoked.clone()
    }

    pub fn message_text(&self, chat: ChatId, message: MessageId) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .get(&(chat, message))
            .cloned()
    }
}

#[async_trait]
impl PlatformGateway for FakeGateway {
    fn service_account(&self) -> &ServiceAccount {
        &self.account
    }

    async fn create_invite_link(&self, channel: ChatId) -> GatewayResult<String> {
        let delay = self.state.lock().unwrap().create_delay;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let mut st = self.state.lock().unwrap();
        if let Some(e) = st.create_failures.get(&channel) {
            return Err(e.clone());
        }
        st.next_link += 1;
        let link = format!("https://t.me/+fake{}", st.next_link);
        st.created.push((channel, link.clone()));
        Ok(link)
    }

    async fn revoke_invite_link(&self, channel: ChatId, link: &str) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        if let Some(e) = st.revoke_failures.get(link) {
            return Err(e.clone());
        }
        st.revoked.push((channel, link.to_string()));
        Ok(())
    }

    async fn edit_message_text(
        &self,
        channel: ChatId,
        message: MessageId,
        html: &str,
    ) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        if let Some(e) = st.edit_failures.get(&channel) {
            return Err(e.clone());
        }
        let Some(current) = st.messages.get_mut(&(channel, message)) else {
            return Err(GatewayError::InvalidMessageId);
        };
        if current == html {
            return Err(GatewayError::NotModified);
        }
        *current = html.to_string();
        Ok(())
    }

    async fn get_chat_member(&self, chat: ChatId, user: UserId) -> GatewayResult<MemberInfo> {
        let st = self.state.lock().unwrap();
        if st.member_lookup_failures.contains(&chat) {
            return Err(GatewayError::Other("timed out".to_string()));
        }
        st.members
            .get(&(chat, user))
            .copied()
            .ok_or(GatewayError::NotParticipant)
    }

    async fn get_chat(&self, chat: &ChatRef) -> GatewayResult<ChatInfo> {
        let st = self.state.lock().unwrap();
        let id = match chat {
            ChatRef::Id(id) => *id,
            ChatRef::Username(name) => *st
                .usernames
                .get(&name.to_lowercase())
                .ok_or(GatewayError::InvalidChannel)?,
        };
        if st.chat_lookup_failures.contains(&id) {
            return Err(GatewayError::Other("timed out".to_string()));
        }
        st.chats.get(&id).cloned().ok_or(GatewayError::InvalidChannel)
    }

    async fn message_exists(&self, chat: ChatId, message: MessageId) -> GatewayResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .contains_key(&(chat, message)))
    }
}
