//! 旧版平面快照格式（整份 JSON blob）
//!
//! `{"Users": {"<id>": {"Entries": {"<name>": {"Name": "...", "Duration": <ns>}}, "Current": "...",
//! "LastChanged": "<rfc3339>", "FirstSeen": "<rfc3339>"}}}`

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::tracker::{PlayedEntry, PlayedUser};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct LegacySnapshot {
    #[serde(default)]
    pub users: HashMap<String, Option<LegacyUser>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct LegacyUser {
    #[serde(default)]
    entries: HashMap<String, Option<LegacyEntry>>,
    #[serde(default)]
    current: String,
    last_changed: DateTime<Utc>,
    first_seen: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyEntry {
    #[serde(default)]
    name: String,
    /// 纳秒
    #[serde(default)]
    duration: i64,
}

impl From<LegacyUser> for PlayedUser {
    fn from(legacy: LegacyUser) -> Self {
        let entries = legacy
            .entries
            .into_iter()
            .filter_map(|(key, entry)| {
                let entry = entry?;
                let name = if entry.name.is_empty() { key.clone() } else { entry.name };
                let duration = Duration::from_nanos(entry.duration.max(0) as u64);
                Some((key, PlayedEntry { name, duration }))
            })
            .collect();
        Self {
            entries,
            current: legacy.current,
            last_changed: legacy.last_changed,
            first_seen: legacy.first_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_legacy_snapshot() {
        let json = r#"{
            "Users": {
                "42": {
                    "Entries": {
                        "Doom": {"Name": "Doom", "Duration": 90000000000},
                        "Quake": null
                    },
                    "Current": "Doom",
                    "LastChanged": "2016-05-01T10:00:00.5-07:00",
                    "FirstSeen": "2016-04-01T00:00:00Z"
                },
                "7": null
            }
        }"#;
        let snapshot: LegacySnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.users.len(), 2);

        let user: PlayedUser = snapshot.users.into_iter().find(|(k, _)| k == "42").unwrap().1.unwrap().into();
        assert_eq!(user.entries.len(), 1);
        assert_eq!(user.entries["Doom"].duration, Duration::from_secs(90));
        assert_eq!(user.current, "Doom");
        assert_eq!(user.last_changed.to_rfc3339(), "2016-05-01T17:00:00.500+00:00");
    }
}
