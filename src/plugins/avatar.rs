//! Avatar 插件：`avatar [@user]` 回复自己或被提及用户的头像

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{mentioned_user_id, raw_query};
use crate::commands::{command_help, matches_command};
use crate::core::{Bot, Message, Plugin, Service};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct AvatarPlugin;

impl AvatarPlugin {
    pub fn new() -> Self {
        Self
    }

    async fn lookup(&self, service: &dyn Service, user_id: &str) -> Option<String> {
        let directory = service.user_directory()?;
        match tokio::time::timeout(LOOKUP_TIMEOUT, directory.avatar_url(user_id)).await {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                tracing::warn!("Error looking up avatar for {} on {}: {}", user_id, service.name(), e);
                None
            }
            Err(_) => {
                tracing::warn!("Avatar lookup for {} on {} timed out", user_id, service.name());
                None
            }
        }
    }
}

#[async_trait]
impl Plugin for AvatarPlugin {
    fn name(&self) -> &str {
        "Avatar"
    }

    async fn on_message(&self, _bot: &Arc<Bot>, service: &Arc<dyn Service>, message: &Arc<Message>) {
        if service.is_self(message) || !matches_command(service.as_ref(), "avatar", message) {
            return;
        }

        let url = match mentioned_user_id(raw_query(&message.raw_text)) {
            Some(id) => self.lookup(service.as_ref(), &id).await,
            None if !message.user_avatar.is_empty() => Some(message.user_avatar.clone()),
            None => self.lookup(service.as_ref(), &message.user_id).await,
        };

        let reply = url.unwrap_or_else(|| "I couldn't find that avatar, sorry!".to_string());
        if let Err(e) = service.send_message(&message.channel_id, &reply).await {
            tracing::warn!("Error sending avatar on {}: {}", service.name(), e);
        }
    }

    async fn help(
        &self,
        _bot: &Arc<Bot>,
        service: &Arc<dyn Service>,
        _message: &Message,
        detailed: bool,
    ) -> Vec<String> {
        if detailed {
            return Vec::new();
        }
        vec![command_help(
            service.as_ref(),
            "avatar",
            "[@username]",
            "Returns a big version of your avatar, or a users avatar if provided.",
        )]
    }
}
