//! Comic 插件：记录每个频道最近的消息，按命令把它们做成漫画
//!
//! - `comic [1-10]`：用最近 N 条消息生成
//! - `customcomic a: text | b: text`：用给定台词生成
//!
//! 命令本身不进入日志。状态（各频道日志与生成计数）以 JSON 快照持久化。

mod log;
mod render;

pub use log::ChannelLog;
pub use render::{ComicRenderer, RenderError, Script, ScriptLine, TranscriptRenderer};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::commands::{command_help, matches_command, parse_command};
use crate::core::{Bot, Message, Plugin, PluginError, Service};

const RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// 未指定条数时使用的默认条数
const DEFAULT_LINES: usize = 3;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComicState {
    #[serde(default)]
    logs: HashMap<String, ChannelLog>,
    #[serde(default)]
    comics: u64,
}

pub struct ComicPlugin {
    capacity: usize,
    renderer: Arc<dyn ComicRenderer>,
    state: Mutex<ComicState>,
}

impl ComicPlugin {
    pub fn new(capacity: usize, renderer: Arc<dyn ComicRenderer>) -> Self {
        Self {
            capacity: capacity.max(1),
            renderer,
            state: Mutex::new(ComicState::default()),
        }
    }

    pub async fn comics_created(&self) -> u64 {
        self.state.lock().await.comics
    }

    /// 某个频道当前的日志
    pub async fn channel_log(&self, channel: &str) -> Option<ChannelLog> {
        self.state.lock().await.logs.get(channel).cloned()
    }

    async fn apologize(&self, service: &dyn Service, message: &Message, text: &str) {
        let reply = format!("Sorry {}, {}", message.user_name, text);
        if let Err(e) = service.send_message(&message.channel_id, &reply).await {
            tracing::warn!("Error sending comic reply on {}: {}", service.name(), e);
        }
    }

    /// 计数后渲染并发送；调用时不持有状态锁
    async fn make_comic(&self, service: &dyn Service, message: &Message, script: Script) {
        self.state.lock().await.comics += 1;

        let image = match tokio::time::timeout(RENDER_TIMEOUT, self.renderer.render(&script)).await {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                tracing::error!("Error rendering comic on {}: {}", service.name(), e);
                self.apologize(service, message, "there was an error creating the comic.")
                    .await;
                return;
            }
            Err(_) => {
                tracing::error!("Rendering comic on {} timed out", service.name());
                self.apologize(service, message, "there was an error creating the comic.")
                    .await;
                return;
            }
        };

        if let Err(e) = service
            .send_file(&message.channel_id, self.renderer.file_name(), image)
            .await
        {
            tracing::error!("Error sending comic on {}: {}", service.name(), e);
            self.apologize(service, message, "there was a problem sending your comic.")
                .await;
        }
    }

    async fn custom_comic(&self, service: &dyn Service, message: &Message) {
        service.typing(&message.channel_id).await;
        let (args, _) = parse_command(service, message);
        let script = Script::parse_custom(service.user_name(), &args);
        if script.is_empty() {
            self.apologize(service, message, "you didn't add any text.").await;
            return;
        }
        self.make_comic(service, message, script).await;
    }

    async fn log_comic(&self, service: &dyn Service, message: &Message) {
        let (_, parts) = parse_command(service, message);
        let requested = parts.first().and_then(|p| p.parse::<usize>().ok()).unwrap_or(0);

        let recent = {
            let state = self.state.lock().await;
            let Some(log) = state.logs.get(&message.channel_id).filter(|l| !l.is_empty()) else {
                drop(state);
                self.apologize(service, message, "I don't have enough messages to make a comic yet.")
                    .await;
                return;
            };
            let count = if requested == 0 { DEFAULT_LINES } else { requested };
            log.last(count.min(log.len()))
        };

        service.typing(&message.channel_id).await;
        let script = Script::from_messages(service.user_name(), &recent);
        self.make_comic(service, message, script).await;
    }

    async fn record(&self, service: &dyn Service, message: &Message) {
        let prefix = service.command_prefix();
        if !prefix.is_empty() && message.text.trim().to_lowercase().starts_with(&prefix.to_lowercase()) {
            return;
        }
        let mut state = self.state.lock().await;
        state
            .logs
            .entry(message.channel_id.clone())
            .or_insert_with(|| ChannelLog::new(self.capacity))
            .apply(message);
    }
}

#[async_trait]
impl Plugin for ComicPlugin {
    fn name(&self) -> &str {
        "Comic"
    }

    async fn load(
        &self,
        _bot: &Arc<Bot>,
        service: &Arc<dyn Service>,
        data: Option<Vec<u8>>,
    ) -> Result<(), PluginError> {
        let Some(data) = data else {
            return Ok(());
        };
        match serde_json::from_slice::<ComicState>(&data) {
            Ok(mut loaded) => {
                for log in loaded.logs.values_mut() {
                    log.set_capacity(self.capacity);
                }
                tracing::debug!(
                    "Loaded {} comic logs on {}",
                    loaded.logs.len(),
                    service.name()
                );
                *self.state.lock().await = loaded;
            }
            Err(e) => tracing::warn!("Error loading comic data on {}: {}", service.name(), e),
        }
        Ok(())
    }

    async fn save(&self) -> Result<Option<Vec<u8>>, PluginError> {
        let state = self.state.lock().await;
        Ok(Some(serde_json::to_vec(&*state)?))
    }

    async fn on_message(&self, _bot: &Arc<Bot>, service: &Arc<dyn Service>, message: &Arc<Message>) {
        if service.is_self(message) {
            return;
        }
        let service = service.as_ref();
        if matches_command(service, "customcomic", message) {
            self.custom_comic(service, message).await;
        } else if matches_command(service, "comic", message) {
            self.log_comic(service, message).await;
        } else {
            self.record(service, message).await;
        }
    }

    async fn help(
        &self,
        _bot: &Arc<Bot>,
        service: &Arc<dyn Service>,
        _message: &Message,
        detailed: bool,
    ) -> Vec<String> {
        let service = service.as_ref();
        let mut help = vec![command_help(
            service,
            "comic",
            "[1-10]",
            &format!(
                "Creates a comic from the last {} messages, or a number of messages if provided.",
                DEFAULT_LINES
            ),
        )];
        if !detailed {
            return help;
        }

        let names = self.renderer.character_names();
        let description = if names.is_empty() {
            "Creates a custom comic.".to_string()
        } else {
            format!("Creates a custom comic. Available names: {}", names.join(", "))
        };
        help.push(command_help(
            service,
            "customcomic",
            "[id|name:] <text> | [id|name:] <text>",
            &description,
        ));
        help.push("Examples:".to_string());
        help.push(command_help(service, "comic", "5", "Creates a comic from the last 5 messages"));
        help.push(command_help(service, "customcomic", "A | B | C", "Creates a comic with 3 lines."));
        help.push(command_help(
            service,
            "customcomic",
            "0: Hi! | 1: Hello! | 0: Goodbye.",
            "Creates a comic with 3 lines, the second line spoken by a different character",
        ));
        help
    }

    async fn stats(&self, _bot: &Arc<Bot>, _service: &Arc<dyn Service>, _message: &Message) -> Vec<String> {
        vec![format!("Comics created: {}", self.comics_created().await)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BotBuilder, MessageKind};
    use crate::services::{MockService, SentMessage};

    struct FailingRenderer;

    #[async_trait]
    impl ComicRenderer for FailingRenderer {
        fn file_name(&self) -> &str {
            "comic.png"
        }

        async fn render(&self, _script: &Script) -> Result<Vec<u8>, RenderError> {
            Err(RenderError::Failed("no fonts".into()))
        }
    }

    async fn feed(plugin: &ComicPlugin, mock: &Arc<MockService>, messages: Vec<Message>) {
        let bot = BotBuilder::new("unused").without_help().build();
        let service: Arc<dyn Service> = mock.clone();
        for m in messages {
            plugin.on_message(&bot, &service, &Arc::new(m)).await;
        }
    }

    #[tokio::test]
    async fn test_commands_not_logged() {
        let plugin = ComicPlugin::new(10, Arc::new(TranscriptRenderer));
        let mock = Arc::new(MockService::new("irc"));
        feed(
            &plugin,
            &mock,
            vec![
                Message::new("#c", "1", "alice", "hello"),
                Message::new("#c", "1", "alice", "!stats"),
                Message::new("#c", "2", "bob", "hi"),
            ],
        )
        .await;
        let log = plugin.channel_log("#c").await.unwrap();
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_comic_from_log() {
        let plugin = ComicPlugin::new(10, Arc::new(TranscriptRenderer));
        let mock = Arc::new(MockService::new("irc"));
        feed(
            &plugin,
            &mock,
            vec![
                Message::new("#c", "1", "alice", "one").with_message_id("1"),
                Message::new("#c", "2", "bob", "two").with_message_id("2"),
                Message::new("#c", "2", "bob", "TWO").with_message_id("2").with_kind(MessageKind::Update),
                Message::new("#c", "1", "alice", "!comic 2"),
            ],
        )
        .await;

        match mock.sent().as_slice() {
            [SentMessage::File { filename, data, .. }] => {
                assert_eq!(filename, "comic.txt");
                let text = String::from_utf8(data.clone()).unwrap();
                assert!(text.contains("1. alice: one"));
                assert!(text.contains("2. bob: TWO"));
            }
            other => panic!("unexpected sends: {:?}", other),
        }
        assert_eq!(plugin.comics_created().await, 1);
    }

    #[tokio::test]
    async fn test_empty_log_and_empty_custom_apologize() {
        let plugin = ComicPlugin::new(10, Arc::new(TranscriptRenderer));
        let mock = Arc::new(MockService::new("irc"));
        feed(
            &plugin,
            &mock,
            vec![
                Message::new("#c", "1", "alice", "!comic"),
                Message::new("#c", "1", "alice", "!customcomic  | "),
            ],
        )
        .await;
        let sent = mock.sent();
        assert_eq!(sent[0].text(), "Sorry alice, I don't have enough messages to make a comic yet.");
        assert_eq!(sent[1].text(), "Sorry alice, you didn't add any text.");
        assert_eq!(plugin.comics_created().await, 0);
    }

    #[tokio::test]
    async fn test_render_failure_apologizes() {
        let plugin = ComicPlugin::new(10, Arc::new(FailingRenderer));
        let mock = Arc::new(MockService::new("irc"));
        feed(&plugin, &mock, vec![Message::new("#c", "1", "alice", "!customcomic a: hi")]).await;
        assert_eq!(
            mock.sent()[0].text(),
            "Sorry alice, there was an error creating the comic."
        );
    }

    #[tokio::test]
    async fn test_help_states_default_length() {
        let bot = BotBuilder::new("unused").without_help().build();
        let service: Arc<dyn Service> = Arc::new(MockService::new("irc"));
        let comic = ComicPlugin::new(10, Arc::new(TranscriptRenderer));
        let message = Message::new("#c", "u1", "alice", "!help");

        let short = comic.help(&bot, &service, &message, false).await;
        assert_eq!(
            short,
            vec!["!comic [1-10] - Creates a comic from the last 3 messages, or a number of messages if provided."]
        );
        let detailed = comic.help(&bot, &service, &message, true).await;
        assert!(detailed.len() > short.len());
        assert_eq!(detailed[0], short[0]);
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let plugin = ComicPlugin::new(10, Arc::new(TranscriptRenderer));
        let mock = Arc::new(MockService::new("irc"));
        feed(
            &plugin,
            &mock,
            vec![
                Message::new("#c", "1", "alice", "one"),
                Message::new("#c", "1", "alice", "!customcomic a: hi"),
            ],
        )
        .await;
        let blob = plugin.save().await.unwrap().unwrap();

        let restored = ComicPlugin::new(10, Arc::new(TranscriptRenderer));
        let bot = BotBuilder::new("unused").without_help().build();
        let service: Arc<dyn Service> = mock.clone();
        restored.load(&bot, &service, Some(blob)).await.unwrap();

        let message = Message::new("#c", "1", "alice", "!stats");
        assert_eq!(
            restored.stats(&bot, &service, &message).await,
            plugin.stats(&bot, &service, &message).await
        );
        assert_eq!(
            restored.help(&bot, &service, &message, true).await,
            plugin.help(&bot, &service, &message, true).await
        );
        assert_eq!(restored.channel_log("#c").await, plugin.channel_log("#c").await);
    }
}
