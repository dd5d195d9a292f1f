//! 邀请：`invite` 命令，以及在私聊中直接发送邀请链接的 DirectMessageInvite 插件
//!
//! 机器人需要通过 OAuth 授权加入的后端（提供 `AppAuthorization`）回复授权链接而不是尝试 join。

use std::sync::Arc;

use async_trait::async_trait;

use crate::commands::{CommandContext, CommandHelp, HelpProvider};
use crate::core::{Bot, Message, Plugin, Service, ServiceError};

pub const JOINED: &str = "I have joined that server.";
pub const ALREADY_JOINED: &str = "I have already joined that server.";
pub const JOIN_FAILED: &str = "There was an error joining that server, sorry!";

/// Discord 邀请链接 → 邀请 ID；不是邀请链接时原样返回
pub fn discord_invite_id(invite: &str) -> String {
    invite
        .replace("://discordapp.com/invite/", "://discord.gg/")
        .replace("https://discord.gg/", "")
        .replace("http://discord.gg/", "")
}

fn authorize_text(service: &dyn Service) -> Option<String> {
    service.app_authorization().map(|auth| {
        format!(
            "Please visit {} to add {} to your server.",
            auth.authorize_url(),
            service.user_name()
        )
    })
}

/// join 并私聊告知结果；AlreadyJoined 与其他错误给出不同回复
pub async fn join_and_reply(service: &dyn Service, user_id: &str, target: &str) {
    let reply = match service.join(target).await {
        Ok(()) => JOINED,
        Err(ServiceError::AlreadyJoined) => ALREADY_JOINED,
        Err(e) => {
            tracing::error!("Error joining {} on {}: {}", target, service.name(), e);
            JOIN_FAILED
        }
    };
    if let Err(e) = service.private_message(user_id, reply).await {
        tracing::warn!("Error sending private message on {}: {}", service.name(), e);
    }
}

pub async fn invite_command(ctx: CommandContext) {
    if let Some(text) = authorize_text(ctx.service.as_ref()) {
        ctx.reply(&text).await;
        return;
    }
    if ctx.parts.len() != 1 {
        return;
    }
    let target = discord_invite_id(&ctx.parts[0]);
    join_and_reply(ctx.service.as_ref(), &ctx.message.user_id, &target).await;
}

pub fn invite_help() -> HelpProvider {
    Arc::new(|_: &Bot, service: &dyn Service, _: &Message| {
        if service.app_authorization().is_some() {
            Some(CommandHelp::new(
                "",
                format!("Returns a URL to add {} to your server.", service.user_name()),
            ))
        } else {
            Some(CommandHelp::new("<invite>", "Joins the provided server or channel."))
        }
    })
}

/// 私聊中收到邀请链接时自动加入
#[derive(Debug, Default)]
pub struct DirectMessageInvitePlugin;

impl DirectMessageInvitePlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for DirectMessageInvitePlugin {
    fn name(&self) -> &str {
        "DirectMessageInvite"
    }

    async fn on_message(&self, _bot: &Arc<Bot>, service: &Arc<dyn Service>, message: &Arc<Message>) {
        if service.is_self(message) || !service.is_private(message) {
            return;
        }
        let text = message.text.trim();
        let id = discord_invite_id(text);
        if id == text || !text.starts_with("http") {
            return;
        }

        if let Some(reply) = authorize_text(service.as_ref()) {
            if let Err(e) = service.private_message(&message.user_id, &reply).await {
                tracing::warn!("Error sending private message on {}: {}", service.name(), e);
            }
            return;
        }
        join_and_reply(service.as_ref(), &message.user_id, &id).await;
    }
}
