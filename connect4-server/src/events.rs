//! 对局事件
//!
//! 事件发送不阻塞对局流程：由 [`emit_detached`] 派生任务发送，失败只记录日志。

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Joined,
    Finished,
    BotMove,
    Forfeit,
}

/// 一条对局事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub game_id: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl GameEvent {
    pub fn new(kind: EventKind, game_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            game_id: game_id.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }
}

/// 事件接收端
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: GameEvent) -> Result<()>;
}

/// 在后台发送事件
pub fn emit_detached(sink: &Arc<dyn EventSink>, event: GameEvent) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        let kind = event.kind;
        if let Err(e) = sink.emit(event).await {
            warn!(?kind, error = %e, "failed to emit event");
        }
    });
}

/// 写入日志的事件接收端
#[derive(Debug, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: GameEvent) -> Result<()> {
        info!(
            kind = ?event.kind,
            game_id = %event.game_id,
            payload = %event.payload,
            "game event"
        );
        Ok(())
    }
}

/// 每行一个 JSON 对象，追加写入文件
pub struct JsonLinesEventSink {
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesEventSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建事件日志目录: {:?}", parent))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("无法打开事件日志: {:?}", path))?;
        Ok(Self {
            file: Mutex::new(tokio::fs::File::from_std(file)),
        })
    }
}

#[async_trait]
impl EventSink for JsonLinesEventSink {
    async fn emit(&self, event: GameEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&event).context("序列化事件失败")?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await.context("写入事件日志失败")?;
        file.flush().await.context("刷新事件日志失败")?;
        Ok(())
    }
}

/// 丢弃所有事件
#[derive(Debug, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: GameEvent) -> Result<()> {
        Ok(())
    }
}
