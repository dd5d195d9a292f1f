//! `stats` 命令：版本、运行时长、消息与任务计数，以及各插件的统计行

use crate::commands::{CommandContext, CommandHelp, HelpProvider};
use crate::core::{format_uptime, send_lines};

pub async fn stats_command(ctx: CommandContext) {
    let metrics = ctx.bot.metrics();
    let mut lines = vec![
        format!("chathub: {}", env!("CARGO_PKG_VERSION")),
        format!("Uptime: {}", format_uptime(metrics.uptime())),
        format!("Messages received: {}", metrics.messages_received()),
        format!("Handler faults: {}", metrics.handler_faults()),
        format!("Concurrent tasks: {}", metrics.in_flight()),
        format!("Connected channels: {}", ctx.service.channel_count()),
    ];

    if let Some(plugins) = ctx.bot.plugins(ctx.service.name()) {
        let mut names: Vec<&String> = plugins.keys().collect();
        names.sort();
        for name in names {
            if let Some(plugin) = plugins.get(name) {
                lines.extend(plugin.stats(&ctx.bot, &ctx.service, &ctx.message).await);
            }
        }
    }

    if let Err(e) = send_lines(ctx.service.as_ref(), &ctx.message.channel_id, &lines).await {
        tracing::warn!("Error sending stats on {}: {}", ctx.service.name(), e);
    }
}

pub fn stats_help() -> HelpProvider {
    CommandHelp::fixed("", "Lists bot statistics.")
}
