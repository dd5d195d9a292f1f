//! 内置插件
//!
//! - **help**: 汇总各插件帮助（每个服务自动注册）
//! - **stats**: `stats` 命令，中枢指标与各插件统计
//! - **invite**: `invite` 命令与私聊邀请链接插件
//! - **avatar**: `avatar` 命令
//! - **quit**: 所有者专用的 `quit` 命令
//! - **comic**: 频道消息日志与漫画生成
//! - **played**: 在线状态时长统计（KV 存储 + 批量写入）

pub mod avatar;
pub mod comic;
pub mod help;
pub mod invite;
pub mod played;
pub mod quit;
pub mod stats;

pub use avatar::AvatarPlugin;
pub use comic::{ChannelLog, ComicPlugin, ComicRenderer, Script, ScriptLine, TranscriptRenderer};
pub use help::HelpPlugin;
pub use invite::{discord_invite_id, invite_command, invite_help, DirectMessageInvitePlugin};
pub use played::{PlayedEntry, PlayedPlugin, PlayedTracker, PlayedUser};
pub use quit::{quit_command, quit_help};
pub use stats::{stats_command, stats_help};

use std::sync::OnceLock;

use regex::Regex;

static MENTION_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 文本中第一个 `<@id>` / `<@!id>` 形式的提及
pub(crate) fn mentioned_user_id(text: &str) -> Option<String> {
    let re = MENTION_RE
        .get_or_init(|| Regex::new(r"<@!?([0-9A-Za-z_.-]+)>").ok())
        .as_ref()?;
    re.captures(text).map(|c| c[1].to_string())
}

/// 命令名之后的原始文本（保留提及标记）
pub(crate) fn raw_query(raw_text: &str) -> &str {
    raw_text.trim().split_once(' ').map(|(_, rest)| rest.trim()).unwrap_or("")
}
