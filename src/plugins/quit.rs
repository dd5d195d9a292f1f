//! 所有者专用的 `quit` 命令：触发关闭流程（最后一次 save 后 close）

use std::sync::Arc;

use crate::commands::{CommandContext, CommandHandler, CommandHelp, HelpProvider};
use crate::core::{Bot, Message, Service, ShutdownManager, ShutdownReason};

pub fn quit_command(shutdown: Arc<ShutdownManager>) -> Arc<dyn CommandHandler> {
    Arc::new(move |ctx: CommandContext| {
        let shutdown = Arc::clone(&shutdown);
        async move {
            if !ctx.service.is_owner(&ctx.message) {
                return;
            }
            ctx.reply("Saving and shutting down.").await;
            shutdown.shutdown(ShutdownReason::OwnerCommand {
                service: ctx.service.name().to_string(),
                user_id: ctx.message.user_id.clone(),
            });
        }
    })
}

/// 只对所有者显示
pub fn quit_help() -> HelpProvider {
    Arc::new(|_: &Bot, service: &dyn Service, message: &Message| {
        service
            .is_owner(message)
            .then(|| CommandHelp::new("", "Saves state and shuts the bot down."))
    })
}
