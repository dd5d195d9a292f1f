//! 在线状态时长统计：KV 存储 + 内存队列
//!
//! 每个用户一条记录（键为 user id）。高频事件先入队，队列超过阈值、定时器触发、
//! 查询该用户或关闭时整批写入。查询不修改存储。

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::legacy::LegacySnapshot;
use crate::core::Presence;
use crate::store::{KvStore, StoreError, WriteBatch};

/// 某个活动的累计时长
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedEntry {
    pub name: String,
    pub duration: Duration,
}

/// 一个用户的记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedUser {
    pub entries: HashMap<String, PlayedEntry>,
    /// 当前活动，空串表示无
    pub current: String,
    pub last_changed: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
}

impl PlayedUser {
    pub fn new(activity: &str, now: DateTime<Utc>) -> Self {
        Self {
            entries: HashMap::new(),
            current: activity.to_string(),
            last_changed: now,
            first_seen: now,
        }
    }

    fn add_elapsed(&mut self, now: DateTime<Utc>) {
        if self.current.is_empty() {
            return;
        }
        let elapsed = (now - self.last_changed).to_std().unwrap_or_default();
        let current = self.current.clone();
        self.entries
            .entry(current.clone())
            .or_insert_with(|| PlayedEntry {
                name: current,
                duration: Duration::ZERO,
            })
            .duration += elapsed;
    }

    /// 把上次变更以来的时长计入之前的活动，再切换到 activity
    pub fn update(&mut self, activity: &str, now: DateTime<Utc>) {
        self.add_elapsed(now);
        self.current = activity.to_string();
        self.last_changed = now;
    }

    /// 计入当前活动尚未结算的时长后的副本；last_changed 保持不变
    pub fn with_pending(&self, now: DateTime<Utc>) -> Self {
        let mut copy = self.clone();
        copy.add_elapsed(now);
        copy
    }

    /// 时长最长的 n 项
    pub fn top(&self, n: usize) -> Vec<&PlayedEntry> {
        let mut entries: Vec<&PlayedEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| b.duration.cmp(&a.duration).then_with(|| a.name.cmp(&b.name)));
        entries.truncate(n);
        entries
    }
}

struct QueuedPresence {
    presence: Presence,
    at: DateTime<Utc>,
}

pub struct PlayedTracker {
    store: KvStore,
    flush_threshold: usize,
    queue: Mutex<Vec<QueuedPresence>>,
}

impl PlayedTracker {
    pub fn new(store: KvStore, flush_threshold: usize) -> Self {
        Self {
            store,
            flush_threshold,
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn open(path: impl AsRef<Path>, flush_threshold: usize) -> Result<Self, StoreError> {
        Ok(Self::new(KvStore::open(path)?, flush_threshold))
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    fn queue(&self) -> MutexGuard<'_, Vec<QueuedPresence>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 队列中尚未写入的事件数
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    /// 完整快照：立即整批写入
    pub fn apply_snapshot(&self, presences: &[Presence], now: DateTime<Utc>) -> Result<(), StoreError> {
        let _queue = self.queue();
        self.apply(presences.iter().map(|p| (p, now)))
    }

    /// 入队；返回是否因超过阈值而触发了写入
    pub fn enqueue(&self, presence: Presence, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.enqueue_all(vec![presence], now)
    }

    pub fn enqueue_all(&self, presences: Vec<Presence>, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut queue = self.queue();
        queue.extend(presences.into_iter().map(|presence| QueuedPresence { presence, at: now }));
        if queue.len() > self.flush_threshold {
            self.flush_locked(&mut queue)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// 把整个队列作为一批写入，返回写入的事件数
    pub fn flush(&self) -> Result<usize, StoreError> {
        let mut queue = self.queue();
        self.flush_locked(&mut queue)
    }

    fn flush_locked(&self, queue: &mut Vec<QueuedPresence>) -> Result<usize, StoreError> {
        if queue.is_empty() {
            return Ok(0);
        }
        let count = queue.len();
        self.apply(queue.iter().map(|q| (&q.presence, q.at)))?;
        queue.clear();
        tracing::debug!("Flushed {} presence events", count);
        Ok(count)
    }

    fn load_user(&self, user_id: &str) -> Result<Option<PlayedUser>, StoreError> {
        match self.store.get_json(user_id) {
            Err(StoreError::Codec(e)) => {
                tracing::warn!("Discarding unreadable played record for {}: {}", user_id, e);
                Ok(None)
            }
            other => other,
        }
    }

    /// 同一批次内同一用户的多个事件按顺序累计
    fn apply<'a>(
        &self,
        events: impl IntoIterator<Item = (&'a Presence, DateTime<Utc>)>,
    ) -> Result<(), StoreError> {
        let mut users: HashMap<String, PlayedUser> = HashMap::new();
        for (presence, at) in events {
            let activity = presence.activity.as_deref().unwrap_or("");
            let user = match users.entry(presence.user_id.clone()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let existing = self.load_user(&presence.user_id)?;
                    e.insert(existing.unwrap_or_else(|| PlayedUser::new(activity, at)))
                }
            };
            user.update(activity, at);
        }

        let mut batch = WriteBatch::new();
        for (user_id, user) in &users {
            batch.put_json(user_id.as_str(), user)?;
        }
        self.store.write(batch)
    }

    /// 查询用户；队列里有该用户的事件时先写入
    pub fn query(&self, user_id: &str, now: DateTime<Utc>) -> Result<Option<PlayedUser>, StoreError> {
        {
            let mut queue = self.queue();
            if queue.iter().any(|q| q.presence.user_id == user_id) {
                self.flush_locked(&mut queue)?;
            }
        }
        Ok(self.load_user(user_id)?.map(|user| user.with_pending(now)))
    }

    /// 导入旧版快照，所有用户作为一批写入；返回导入的用户数
    pub fn migrate_legacy(&self, blob: &[u8]) -> Result<usize, StoreError> {
        let snapshot: LegacySnapshot = serde_json::from_slice(blob)?;
        let mut batch = WriteBatch::new();
        for (user_id, user) in snapshot.users {
            let Some(user) = user else {
                continue;
            };
            batch.put_json(user_id, &PlayedUser::from(user))?;
        }
        let count = batch.len();
        self.store.write(batch)?;
        Ok(count)
    }

    /// 写入剩余队列后关闭存储
    pub fn close(&self) -> Result<(), StoreError> {
        let flushed = self.flush();
        self.store.close()?;
        flushed.map(|_| ())
    }
}

/// `1h 2m 3s`；小时为 0 时省略，分钟在有小时时保留
pub fn format_played(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h ", hours));
    }
    if minutes > 0 || !out.is_empty() {
        out.push_str(&format!("{}m ", minutes));
    }
    out.push_str(&format!("{}s", seconds));
    out
}

/// 相对时间，如 `3 hours ago`
pub fn format_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds();
    if secs < 1 {
        return "now".to_string();
    }
    let (value, unit) = match secs {
        s if s < 60 => (s, "second"),
        s if s < 3600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3600, "hour"),
        s if s < 86_400 * 30 => (s / 86_400, "day"),
        s if s < 86_400 * 365 => (s / (86_400 * 30), "month"),
        s => (s / (86_400 * 365), "year"),
    };
    if value == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", value, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn tracker(threshold: usize) -> PlayedTracker {
        PlayedTracker::new(KvStore::open_in_memory().unwrap(), threshold)
    }

    #[test]
    fn test_update_accumulates_previous_activity() {
        let mut user = PlayedUser::new("", t0());
        user.update("X", t0());
        user.update("Y", t0() + secs(10));
        user.update("Y", t0() + secs(40));
        assert_eq!(user.entries["X"].duration, Duration::from_secs(10));
        assert_eq!(user.entries["Y"].duration, Duration::from_secs(30));
        assert_eq!(user.current, "Y");

        // 无活动期间不计时
        user.update("", t0() + secs(50));
        user.update("X", t0() + secs(500));
        assert_eq!(user.entries["Y"].duration, Duration::from_secs(40));
        assert_eq!(user.entries["X"].duration, Duration::from_secs(10));
    }

    #[test]
    fn test_events_through_tracker() {
        let tracker = tracker(500);
        tracker.enqueue(Presence::new("A", Some("X")), t0()).unwrap();
        tracker.enqueue(Presence::new("A", Some("Y")), t0() + secs(10)).unwrap();
        tracker.enqueue(Presence::new("A", Some("Y")), t0() + secs(40)).unwrap();
        assert_eq!(tracker.pending(), 3);
        // 队列中的事件尚未写入
        assert!(tracker.store().get("A").unwrap().is_none());

        let user = tracker.query("A", t0() + secs(45)).unwrap().unwrap();
        assert_eq!(tracker.pending(), 0);
        assert!(user.entries["X"].duration >= Duration::from_secs(10));
        // Y: 30s 已结算 + 5s 未结算
        assert_eq!(user.entries["Y"].duration, Duration::from_secs(35));
        assert_eq!(user.last_changed, t0() + secs(40));

        // 查询不写存储
        let stored: PlayedUser = tracker.store().get_json("A").unwrap().unwrap();
        assert_eq!(stored.entries["Y"].duration, Duration::from_secs(30));
    }

    #[test]
    fn test_threshold_flush_without_explicit_call() {
        let tracker = tracker(2);
        assert!(!tracker.enqueue(Presence::new("A", Some("X")), t0()).unwrap());
        assert!(!tracker.enqueue(Presence::new("B", Some("X")), t0()).unwrap());
        assert!(tracker.enqueue(Presence::new("C", None), t0()).unwrap());
        assert_eq!(tracker.pending(), 0);
        assert_eq!(tracker.store().keys().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_query_other_user_does_not_flush() {
        let tracker = tracker(500);
        tracker.apply_snapshot(&[Presence::new("A", Some("X"))], t0()).unwrap();
        tracker.enqueue(Presence::new("B", Some("Y")), t0()).unwrap();
        let user = tracker.query("A", t0() + secs(60)).unwrap().unwrap();
        assert_eq!(user.entries["X"].duration, Duration::from_secs(60));
        assert_eq!(tracker.pending(), 1);
        assert!(tracker.query("nobody", t0()).unwrap().is_none());
    }

    #[test]
    fn test_close_flushes_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PlayedDB");
        let tracker = PlayedTracker::open(&path, 500).unwrap();
        tracker.enqueue(Presence::new("A", Some("X")), t0()).unwrap();
        tracker.close().unwrap();
        assert!(tracker.is_closed());

        let reopened = KvStore::open(&path).unwrap();
        assert!(reopened.get("A").unwrap().is_some());
    }

    #[test]
    fn test_migrate_legacy() {
        let tracker = tracker(500);
        let blob = br#"{"Users": {
            "1": {"Entries": {"Doom": {"Name": "Doom", "Duration": 3600000000000}}, "Current": "", "LastChanged": "2016-01-01T00:00:00Z", "FirstSeen": "2015-01-01T00:00:00Z"},
            "2": {"Entries": {}, "Current": "Quake", "LastChanged": "2016-01-01T00:00:00Z", "FirstSeen": "2016-01-01T00:00:00Z"}
        }}"#;
        assert_eq!(tracker.migrate_legacy(blob).unwrap(), 2);
        let user: PlayedUser = tracker.store().get_json("1").unwrap().unwrap();
        assert_eq!(user.entries["Doom"].duration, Duration::from_secs(3600));
        assert!(matches!(tracker.migrate_legacy(b"not json"), Err(StoreError::Codec(_))));
    }

    #[test]
    fn test_top_and_formatting() {
        let mut user = PlayedUser::new("", t0());
        for (i, name) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
            user.entries.insert(
                name.to_string(),
                PlayedEntry {
                    name: name.to_string(),
                    duration: Duration::from_secs(i as u64 * 100),
                },
            );
        }
        let top: Vec<&str> = user.top(5).iter().map(|e| e.name.as_str()).collect();
        assert_eq!(top, vec!["f", "e", "d", "c", "b"]);

        assert_eq!(format_played(Duration::from_secs(3723)), "1h 2m 3s");
        assert_eq!(format_played(Duration::from_secs(3603)), "1h 0m 3s");
        assert_eq!(format_played(Duration::from_secs(62)), "1m 2s");
        assert_eq!(format_played(Duration::from_secs(5)), "5s");

        assert_eq!(format_ago(t0(), t0() + secs(3 * 3600)), "3 hours ago");
        assert_eq!(format_ago(t0(), t0() + secs(60)), "1 minute ago");
        assert_eq!(format_ago(t0(), t0()), "now");
    }
}
