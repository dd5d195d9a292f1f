//! Help 插件：`help` 列出所有插件的帮助，`help <topic>` 显示某个插件的详细帮助

use std::sync::Arc;

use async_trait::async_trait;

use crate::commands::{command_help, matches_command, parse_command};
use crate::core::{send_lines, Bot, Message, Plugin, Service};

const HELP_NAME: &str = "Help";

#[derive(Debug, Default)]
pub struct HelpPlugin;

impl HelpPlugin {
    pub fn new() -> Self {
        Self
    }

    /// 提供详细帮助的插件名（小写、排序）
    async fn topics(&self, bot: &Arc<Bot>, service: &Arc<dyn Service>, message: &Message) -> Vec<String> {
        let mut topics = Vec::new();
        for plugin in sorted_plugins(bot, service.name()) {
            if plugin.name() == HELP_NAME {
                continue;
            }
            if !plugin.help(bot, service, message, true).await.is_empty() {
                topics.push(plugin.name().to_lowercase());
            }
        }
        topics.sort();
        topics
    }
}

fn sorted_plugins(bot: &Bot, service_name: &str) -> Vec<Arc<dyn Plugin>> {
    let Some(plugins) = bot.plugins(service_name) else {
        return Vec::new();
    };
    let mut names: Vec<&String> = plugins.keys().collect();
    names.sort();
    names.into_iter().filter_map(|n| plugins.get(n).cloned()).collect()
}

#[async_trait]
impl Plugin for HelpPlugin {
    fn name(&self) -> &str {
        HELP_NAME
    }

    async fn on_message(&self, bot: &Arc<Bot>, service: &Arc<dyn Service>, message: &Arc<Message>) {
        if service.is_self(message) || !matches_command(service.as_ref(), "help", message) {
            return;
        }
        let (_, parts) = parse_command(service.as_ref(), message);

        let mut lines = Vec::new();
        for plugin in sorted_plugins(bot, service.name()) {
            if parts.is_empty() {
                lines.extend(plugin.help(bot, service, message, false).await);
            } else if parts.len() == 1 && parts[0].eq_ignore_ascii_case(plugin.name()) {
                lines.extend(plugin.help(bot, service, message, true).await);
            }
        }

        if parts.is_empty() {
            lines.sort();
            lines.insert(
                0,
                format!(
                    "All commands can be used in private messages without the `{}` prefix.",
                    service.command_prefix()
                ),
            );
        } else if lines.is_empty() {
            lines.push(format!("Unknown topic: {}", parts[0]));
        }

        if let Err(e) = send_lines(service.as_ref(), &message.channel_id, &lines).await {
            tracing::warn!("Error sending help on {}: {}", service.name(), e);
        }
    }

    async fn help(
        &self,
        bot: &Arc<Bot>,
        service: &Arc<dyn Service>,
        message: &Message,
        detailed: bool,
    ) -> Vec<String> {
        if detailed {
            return Vec::new();
        }
        let topics = self.topics(bot, service, message).await;
        let description = if topics.is_empty() {
            "Returns generic help.".to_string()
        } else {
            format!(
                "Returns generic help or help for a specific topic. Available topics: {}",
                topics.join(", ")
            )
        };
        vec![command_help(service.as_ref(), "help", "[<topic>]", &description)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BotBuilder, SimplePlugin};
    use crate::services::{MockService, SentMessage};

    fn bot_with(service: Arc<MockService>) -> Arc<Bot> {
        let mut builder = BotBuilder::new("unused");
        builder.register_service(service).unwrap();
        builder
            .register_plugin(
                "irc",
                Arc::new(SimplePlugin::new("Echo").with_help(|_, service, _, detailed| {
                    if detailed {
                        vec!["Echo repeats things.".to_string()]
                    } else {
                        vec![command_help(service, "echo", "<text>", "Repeats text.")]
                    }
                })),
            )
            .unwrap();
        builder.build()
    }

    async fn ask(text: &str, multiline: bool) -> Vec<SentMessage> {
        let mock = Arc::new(MockService::new("irc").with_multiline(multiline));
        let bot = bot_with(Arc::clone(&mock));
        let service: Arc<dyn Service> = mock.clone();
        let help = bot.plugins("irc").unwrap().get(HELP_NAME).unwrap().clone();
        help.on_message(&bot, &service, &Arc::new(Message::new("#c", "u1", "alice", text)))
            .await;
        mock.sent()
    }

    #[tokio::test]
    async fn test_generic_help() {
        let sent = ask("!help", true).await;
        assert_eq!(sent.len(), 1);
        let text = sent[0].text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "All commands can be used in private messages without the `!` prefix.");
        assert_eq!(lines[1], "!echo <text> - Repeats text.");
        assert_eq!(
            lines[2],
            "!help [<topic>] - Returns generic help or help for a specific topic. Available topics: echo"
        );
    }

    #[tokio::test]
    async fn test_topic_help() {
        let sent = ask("!help ECHO", true).await;
        assert_eq!(sent[0].text(), "Echo repeats things.");

        let sent = ask("!help nothing", true).await;
        assert_eq!(sent[0].text(), "Unknown topic: nothing");
    }

    #[tokio::test]
    async fn test_single_line_services_get_one_message_per_line() {
        let sent = ask("!help", false).await;
        assert_eq!(sent.len(), 3);
    }
}
