//! 本地终端后端
//!
//! stdin 的每一行作为所有者在私聊频道中发出的一条消息；回复写到 stdout。
//! stdin 关闭（EOF）时消息流结束。

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::config::ConsoleSection;
use crate::core::{Message, MessageStream, Service, ServiceError};

/// 终端唯一的频道
pub const CONSOLE_CHANNEL: &str = "console";

pub struct ConsoleService {
    section: ConsoleSection,
    buffer: usize,
    next_id: AtomicU64,
}

impl ConsoleService {
    pub fn new(section: ConsoleSection, buffer: usize) -> Self {
        Self {
            section,
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    async fn write_out(&self, text: &str) -> Result<(), ServiceError> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Service for ConsoleService {
    fn name(&self) -> &str {
        "console"
    }

    fn user_name(&self) -> &str {
        &self.section.user_name
    }

    async fn open(&self) -> Result<MessageStream, ServiceError> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let owner = self.section.owner_id.clone();
        let first_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut id = first_id;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        let message =
                            Message::new(CONSOLE_CHANNEL, &owner, &owner, text).with_message_id(id.to_string());
                        id += 1;
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Console input closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Error reading console input: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn join(&self, _target: &str) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported("console cannot join servers".to_string()))
    }

    async fn send_message(&self, _channel: &str, text: &str) -> Result<(), ServiceError> {
        self.write_out(text).await
    }

    async fn send_file(&self, _channel: &str, filename: &str, data: Vec<u8>) -> Result<(), ServiceError> {
        let body = String::from_utf8_lossy(&data);
        self.write_out(&format!("--- {} ---\n{}", filename, body)).await
    }

    async fn private_message(&self, _user_id: &str, text: &str) -> Result<(), ServiceError> {
        self.write_out(text).await
    }

    async fn typing(&self, _channel: &str) {}

    fn is_self(&self, _message: &Message) -> bool {
        false
    }

    fn is_private(&self, message: &Message) -> bool {
        message.channel_id == CONSOLE_CHANNEL
    }

    fn is_owner(&self, message: &Message) -> bool {
        message.user_id == self.section.owner_id
    }

    fn channel_count(&self) -> usize {
        1
    }

    fn command_prefix(&self) -> &str {
        &self.section.command_prefix
    }

    fn supports_multiline(&self) -> bool {
        true
    }
}
