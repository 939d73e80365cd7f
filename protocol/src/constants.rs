//! 协议常量定义

use std::time::Duration;

/// 协议版本号
pub const PROTOCOL_VERSION: u8 = 1;

/// 棋盘行数
pub const ROWS: usize = 6;

/// 棋盘列数
pub const COLUMNS: usize = 7;

/// 连成多少子获胜
pub const CONNECT: usize = 4;

/// 用户名最大长度
pub const MAX_USERNAME_LEN: usize = 32;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 等待真人对手的默认时长（秒），超时后与机器人对战
pub const BOT_WAIT_SECS: u64 = 10;

/// 断线重连宽限期（秒）
pub const RECONNECT_GRACE_SECS: u64 = 30;

/// 排行榜默认行数
pub const LEADERBOARD_LIMIT: usize = 20;

/// 机器人保留用户名，真人玩家不可使用
pub const BOT_USERNAME: &str = "bot";

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 等待对手 Duration
pub const BOT_WAIT: Duration = Duration::from_secs(BOT_WAIT_SECS);

/// 断线重连宽限期 Duration
pub const RECONNECT_GRACE: Duration = Duration::from_secs(RECONNECT_GRACE_SECS);
