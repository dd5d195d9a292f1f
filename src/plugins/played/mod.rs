//! Played 插件：按在线状态统计每个用户各活动（游戏）的累计时长
//!
//! 数据在 `<data_dir>/<service>/PlayedDB`（KV 存储）。命名空间 blob 只用于一次性迁移：
//! 存储文件不存在且存在旧 blob 时，把旧快照整批导入。

mod legacy;
mod tracker;

pub use tracker::{format_ago, format_played, PlayedEntry, PlayedTracker, PlayedUser};

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use super::{mentioned_user_id, raw_query};
use crate::commands::{command_help, matches_command};
use crate::config::PlayedSection;
use crate::core::{send_lines, Bot, Message, Plugin, PluginError, PresenceEvent, Service};
use crate::store::StoreError;

const STORE_FILE: &str = "PlayedDB";
const TOP_ENTRIES: usize = 5;

/// 有状态插件：每个服务一个实例
pub struct PlayedPlugin {
    section: PlayedSection,
    tracker: OnceLock<Arc<PlayedTracker>>,
}

impl PlayedPlugin {
    pub fn new(section: PlayedSection) -> Self {
        Self {
            section,
            tracker: OnceLock::new(),
        }
    }

    /// load 之后可用
    pub fn tracker(&self) -> Option<&Arc<PlayedTracker>> {
        self.tracker.get()
    }

    async fn reply_played(&self, service: &dyn Service, message: &Message) {
        let Some(tracker) = self.tracker.get() else {
            tracing::warn!("Played command on {} before the store was loaded", service.name());
            return;
        };
        let user_id = mentioned_user_id(raw_query(&message.raw_text)).unwrap_or_else(|| message.user_id.clone());

        let now = Utc::now();
        let query = {
            let tracker = Arc::clone(tracker);
            let user_id = user_id.clone();
            run_blocking(move || tracker.query(&user_id, now)).await
        };
        let lines = match query {
            Ok(None) => vec!["I haven't seen that user.".to_string()],
            Ok(Some(user)) if user.entries.is_empty() => {
                vec!["I haven't seen anything played by that user.".to_string()]
            }
            Ok(Some(user)) => {
                let mut lines = vec![format!(
                    "*First seen {}, last update {}*",
                    format_ago(user.first_seen, now),
                    format_ago(user.last_changed, now)
                )];
                lines.extend(
                    user.top(TOP_ENTRIES)
                        .into_iter()
                        .map(|e| format!("**{}**: {}", e.name, format_played(e.duration))),
                );
                lines
            }
            Err(e) => {
                tracing::error!("Error querying played for {} on {}: {}", user_id, service.name(), e);
                vec!["There was an error looking that up, sorry!".to_string()]
            }
        };

        if let Err(e) = send_lines(service, &message.channel_id, &lines).await {
            tracing::warn!("Error sending played on {}: {}", service.name(), e);
        }
    }
}

/// 在阻塞线程池中执行 SQLite 操作
async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// 消费在线状态事件；存储关闭或订阅结束时退出
async fn consume_presence(tracker: Arc<PlayedTracker>, mut events: mpsc::UnboundedReceiver<PresenceEvent>) {
    while let Some(event) = events.recv().await {
        let now = Utc::now();
        let tracker = Arc::clone(&tracker);
        let result = run_blocking(move || match event {
            PresenceEvent::Snapshot(presences) => tracker.apply_snapshot(&presences, now),
            PresenceEvent::Replace(presences) => tracker.enqueue_all(presences, now).map(|_| ()),
            PresenceEvent::Update(presence) => tracker.enqueue(presence, now).map(|_| ()),
        })
        .await;
        match result {
            Ok(()) => {}
            Err(StoreError::Closed) => break,
            Err(e) => tracing::warn!("Error recording presence: {}", e),
        }
    }
    tracing::debug!("Presence consumer stopped");
}

async fn flush_periodically(tracker: Arc<PlayedTracker>, period: Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        interval.tick().await;
        if tracker.is_closed() {
            break;
        }
        let flushing = Arc::clone(&tracker);
        match run_blocking(move || flushing.flush()).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Periodic flush wrote {} presence events", n),
            Err(e) => tracing::warn!("Error flushing presence queue: {}", e),
        }
    }
}

#[async_trait]
impl Plugin for PlayedPlugin {
    fn name(&self) -> &str {
        "Played"
    }

    async fn load(
        &self,
        bot: &Arc<Bot>,
        service: &Arc<dyn Service>,
        data: Option<Vec<u8>>,
    ) -> Result<(), PluginError> {
        if self.tracker.get().is_some() {
            return Err(PluginError::LoadFailed(format!(
                "Played store already open for {}",
                service.name()
            )));
        }

        let path = bot.storage().service_dir(service.name()).join(STORE_FILE);
        let migrate = !path.exists();
        let threshold = self.section.flush_threshold;
        let tracker = Arc::new(run_blocking(move || PlayedTracker::open(&path, threshold)).await?);

        if let (true, Some(data)) = (migrate, data) {
            let migrating = Arc::clone(&tracker);
            match run_blocking(move || migrating.migrate_legacy(&data)).await {
                Ok(n) => tracing::info!("Migrated {} legacy played records on {}", n, service.name()),
                Err(e) => tracing::warn!("Error migrating legacy played data on {}: {}", service.name(), e),
            }
        }

        let closing = Arc::clone(&tracker);
        bot.add_close_fn(move || {
            if let Err(e) = closing.close() {
                tracing::error!("Error closing played store: {}", e);
            }
        });

        if let Some(feed) = service.presence_feed() {
            tokio::spawn(consume_presence(Arc::clone(&tracker), feed.subscribe()));
        }
        let period = Duration::from_secs(self.section.flush_interval_secs.max(1));
        tokio::spawn(flush_periodically(Arc::clone(&tracker), period));

        let _ = self.tracker.set(tracker);
        Ok(())
    }

    async fn on_message(&self, _bot: &Arc<Bot>, service: &Arc<dyn Service>, message: &Arc<Message>) {
        if service.is_self(message) || !matches_command(service.as_ref(), "played", message) {
            return;
        }
        self.reply_played(service.as_ref(), message).await;
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
            "played",
            "[@username]",
            "Returns your most played games, or a users most played games if provided.",
        )]
    }

    async fn stats(&self, _bot: &Arc<Bot>, _service: &Arc<dyn Service>, _message: &Message) -> Vec<String> {
        match self.tracker.get().map(|t| t.store().len()) {
            Some(Ok(n)) => vec![format!("Played users tracked: {}", n)],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BotBuilder, Presence};
    use crate::services::MockService;

    fn plugin() -> PlayedPlugin {
        PlayedPlugin::new(PlayedSection::default())
    }

    #[tokio::test]
    async fn test_load_creates_store_and_close_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let bot = BotBuilder::new(dir.path()).without_help().build();
        let service: Arc<dyn Service> = Arc::new(MockService::new("discord"));

        let played = plugin();
        played.load(&bot, &service, None).await.unwrap();
        assert!(dir.path().join("discord").join(STORE_FILE).exists());

        let tracker = Arc::clone(played.tracker().unwrap());
        tracker.enqueue(Presence::new("1", Some("Doom")), Utc::now()).unwrap();
        bot.close();
        assert!(tracker.is_closed());

        let store = crate::store::KvStore::open(dir.path().join("discord").join(STORE_FILE)).unwrap();
        assert!(store.get("1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_load_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bot = BotBuilder::new(dir.path()).without_help().build();
        let service: Arc<dyn Service> = Arc::new(MockService::new("discord"));
        let played = plugin();
        played.load(&bot, &service, None).await.unwrap();
        assert!(matches!(
            played.load(&bot, &service, None).await,
            Err(PluginError::LoadFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_played_command_replies() {
        let dir = tempfile::tempdir().unwrap();
        let bot = BotBuilder::new(dir.path()).without_help().build();
        let mock = Arc::new(MockService::new("discord"));
        let service: Arc<dyn Service> = mock.clone();
        let played = plugin();
        played.load(&bot, &service, None).await.unwrap();

        let earlier = Utc::now() - chrono::Duration::seconds(3723);
        let tracker = played.tracker().unwrap();
        tracker.apply_snapshot(&[Presence::new("42", Some("Doom"))], earlier).unwrap();
        tracker
            .enqueue(Presence::new("42", Some("Quake")), earlier + chrono::Duration::seconds(3723))
            .unwrap();

        let ask = Message::new("#c", "u1", "alice", "!played bob").with_raw_text("!played <@42>");
        played.on_message(&bot, &service, &Arc::new(ask)).await;
        let ask = Message::new("#c", "u1", "alice", "!played");
        played.on_message(&bot, &service, &Arc::new(ask)).await;

        let sent = mock.sent();
        let text = sent[0].text();
        assert!(text.starts_with("*First seen 1 hour ago, last update"));
        assert!(text.contains("**Doom**: 1h 2m 3s"));
        assert_eq!(sent[1].text(), "I haven't seen that user.");
    }

    #[tokio::test]
    async fn test_store_work_runs_off_the_runtime_thread() {
        let caller = std::thread::current().id();
        let worker = run_blocking(|| Ok(std::thread::current().id())).await.unwrap();
        assert_ne!(caller, worker);
    }

    #[tokio::test]
    async fn test_large_replace_is_flushed_by_consumer() {
        let dir = tempfile::tempdir().unwrap();
        let bot = BotBuilder::new(dir.path()).without_help().build();
        let mock = Arc::new(MockService::new("discord").with_presence());
        let service: Arc<dyn Service> = mock.clone();
        let played = plugin();
        played.load(&bot, &service, None).await.unwrap();

        let presences: Vec<Presence> = (0..600).map(|i| Presence::new(i.to_string(), Some("Go"))).collect();
        mock.emit_presence(PresenceEvent::Replace(presences));

        let tracker = played.tracker().unwrap();
        for _ in 0..200 {
            if tracker.store().len().unwrap() == 600 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tracker.store().len().unwrap(), 600);
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test]
    async fn test_presence_feed_is_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let bot = BotBuilder::new(dir.path()).without_help().build();
        let mock = Arc::new(MockService::new("discord").with_presence());
        let service: Arc<dyn Service> = mock.clone();
        let played = plugin();
        played.load(&bot, &service, None).await.unwrap();

        mock.emit_presence(PresenceEvent::Snapshot(vec![Presence::new("7", Some("Chess"))]));
        let tracker = played.tracker().unwrap();
        for _ in 0..100 {
            if tracker.store().get("7").unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(tracker.store().get("7").unwrap().is_some());
    }
}
