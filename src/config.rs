//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CHATHUB__*` 覆盖（双下划线表示嵌套，如 `CHATHUB__BOT__DATA_DIR=/var/lib/chathub`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub console: ConsoleSection,
    #[serde(default)]
    pub played: PlayedSection,
    #[serde(default)]
    pub comic: ComicSection,
}

/// [bot] 段：数据目录、保存周期与超时
#[derive(Debug, Clone, Deserialize)]
pub struct BotSection {
    /// 插件状态根目录，文件布局为 `<data_dir>/<service>/<plugin>`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
    /// 单个插件 save 的超时（秒）
    #[serde(default = "default_save_timeout_secs")]
    pub save_timeout_secs: u64,
    /// 每个服务消息流的缓冲条数
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_save_interval_secs() -> u64 {
    60
}

fn default_save_timeout_secs() -> u64 {
    10
}

fn default_message_buffer() -> usize {
    256
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            save_interval_secs: default_save_interval_secs(),
            save_timeout_secs: default_save_timeout_secs(),
            message_buffer: default_message_buffer(),
        }
    }
}

/// [console] 段：本地终端后端
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// 机器人显示名
    #[serde(default = "default_user_name")]
    pub user_name: String,
    /// 终端用户的 ID，同时视为所有者
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
}

fn default_true() -> bool {
    true
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_user_name() -> String {
    "chathub".to_string()
}

fn default_owner_id() -> String {
    "console".to_string()
}

impl Default for ConsoleSection {
    fn default() -> Self {
        Self {
            enabled: true,
            command_prefix: default_command_prefix(),
            user_name: default_user_name(),
            owner_id: default_owner_id(),
        }
    }
}

/// [played] 段：在线状态队列的刷新阈值与周期
#[derive(Debug, Clone, Deserialize)]
pub struct PlayedSection {
    /// 队列长度超过该值时立即整批写入
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_flush_threshold() -> usize {
    500
}

fn default_flush_interval_secs() -> u64 {
    30
}

impl Default for PlayedSection {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

/// [comic] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ComicSection {
    /// 每个频道保留的最近消息条数
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_log_capacity() -> usize {
    10
}

impl Default for ComicSection {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 CHATHUB__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CHATHUB__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CHATHUB")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
