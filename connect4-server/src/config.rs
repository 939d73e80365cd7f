//! 服务端配置
//!
//! 从环境变量读取，未设置的项使用默认值。数值格式错误直接报错。

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use protocol::{BOT_WAIT_SECS, LEADERBOARD_LIMIT, RECONNECT_GRACE_SECS};

use crate::storage::default_data_dir;

/// 服务端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 等待对手的秒数，超时后与机器人开局
    pub bot_wait_secs: u64,
    /// 断线宽限秒数，超时判负
    pub reconnect_secs: u64,
    /// 对局存储根目录，None 时使用平台数据目录
    pub data_dir: Option<PathBuf>,
    /// 事件日志路径，None 时事件写入 tracing
    pub event_log: Option<PathBuf>,
    /// 排行榜默认行数
    pub leaderboard_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            bot_wait_secs: BOT_WAIT_SECS,
            reconnect_secs: RECONNECT_GRACE_SECS,
            data_dir: None,
            event_log: None,
            leaderboard_limit: LEADERBOARD_LIMIT,
        }
    }
}

impl ServerConfig {
    /// 从进程环境变量加载
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源加载
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: value("HOST").unwrap_or(defaults.host),
            port: parse(value("PORT"), "PORT")?.unwrap_or(defaults.port),
            bot_wait_secs: parse(value("BOT_WAIT_SECONDS"), "BOT_WAIT_SECONDS")?
                .unwrap_or(defaults.bot_wait_secs),
            reconnect_secs: parse(value("RECONNECT_SECONDS"), "RECONNECT_SECONDS")?
                .unwrap_or(defaults.reconnect_secs),
            data_dir: value("DATA_DIR").map(PathBuf::from),
            event_log: value("EVENT_LOG").map(PathBuf::from),
            leaderboard_limit: parse(value("LEADERBOARD_LIMIT"), "LEADERBOARD_LIMIT")?
                .unwrap_or(defaults.leaderboard_limit),
        })
    }

    /// 监听地址
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn bot_wait(&self) -> Duration {
        Duration::from_secs(self.bot_wait_secs)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    /// 对局存储根目录
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }
}

fn parse<T>(raw: Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|v| {
        v.trim()
            .parse::<T>()
            .with_context(|| format!("环境变量 {} 的值无效: {:?}", key, v))
    })
    .transpose()
}
