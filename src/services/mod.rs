//! Service 实现：本地终端后端与测试用 Mock 后端
//!
//! 真实聊天协议（Discord / IRC / Slack）不在本 crate 内，各自实现 `core::Service` 即可接入。

pub mod console;
pub mod mock;

pub use console::{ConsoleService, CONSOLE_CHANNEL};
pub use mock::{MockService, SentMessage, MOCK_SELF_ID};
