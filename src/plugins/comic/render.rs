//! 漫画脚本与渲染接口
//!
//! 图像渲染是外部能力，通过 `ComicRenderer` 接入；`TranscriptRenderer` 输出纯文本对白稿。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Message;

/// 一句台词；speaker 为 None 时按 author 名字选角色
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub speaker: Option<usize>,
    pub author: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Script {
    pub lines: Vec<ScriptLine>,
    /// 署名（机器人在该服务上的名字）
    pub author: String,
    /// speaker 序号 → 头像引用
    pub avatars: HashMap<usize, String>,
}

impl Script {
    /// 由频道消息生成：每个不同的用户按首次出现顺序分配 speaker 序号
    pub fn from_messages(author: impl Into<String>, messages: &[Message]) -> Self {
        let mut speakers: HashMap<&str, usize> = HashMap::new();
        let mut avatars = HashMap::new();
        let mut lines = Vec::with_capacity(messages.len());

        for message in messages {
            let next = speakers.len();
            let speaker = *speakers.entry(message.user_name.as_str()).or_insert_with(|| {
                avatars.insert(next, message.user_avatar.clone());
                next
            });
            lines.push(ScriptLine {
                speaker: Some(speaker),
                author: message.user_name.clone(),
                text: message.text.clone(),
            });
        }

        Self {
            lines,
            author: author.into(),
            avatars,
        }
    }

    /// 解析 `a: text | b: text | text`：冒号前为数字时作为 speaker 序号，否则作为角色名
    pub fn parse_custom(author: impl Into<String>, input: &str) -> Self {
        let lines = input
            .split('|')
            .filter_map(|segment| {
                let segment = segment.trim();
                let (who, text) = match segment.split_once(':') {
                    Some((who, text)) => (who.trim().to_lowercase(), text.trim()),
                    None => (String::new(), segment),
                };
                if text.is_empty() {
                    return None;
                }
                let speaker = if who.is_empty() { Some(0) } else { who.parse().ok() };
                Some(ScriptLine {
                    speaker,
                    author: who,
                    text: text.to_string(),
                })
            })
            .collect();

        Self {
            lines,
            author: author.into(),
            avatars: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Script has no lines")]
    EmptyScript,

    #[error("Render failed: {0}")]
    Failed(String),
}

/// 漫画渲染器
#[async_trait]
pub trait ComicRenderer: Send + Sync {
    /// 发送时使用的文件名
    fn file_name(&self) -> &str;

    /// 可在自定义漫画中按名字选择的角色
    fn character_names(&self) -> Vec<String> {
        Vec::new()
    }

    async fn render(&self, script: &Script) -> Result<Vec<u8>, RenderError>;
}

/// 纯文本对白稿
#[derive(Debug, Default)]
pub struct TranscriptRenderer;

#[async_trait]
impl ComicRenderer for TranscriptRenderer {
    fn file_name(&self) -> &str {
        "comic.txt"
    }

    async fn render(&self, script: &Script) -> Result<Vec<u8>, RenderError> {
        if script.is_empty() {
            return Err(RenderError::EmptyScript);
        }
        let mut out = format!("A comic by {}\n\n", script.author);
        for (i, line) in script.lines.iter().enumerate() {
            let who = match (line.speaker, line.author.is_empty()) {
                (_, false) => line.author.clone(),
                (Some(n), true) => format!("#{}", n),
                (None, true) => "?".to_string(),
            };
            out.push_str(&format!("{}. {}: {}\n", i + 1, who, line.text));
        }
        Ok(out.into_bytes())
    }
}
