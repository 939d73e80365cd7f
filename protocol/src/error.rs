//! 错误类型定义

use thiserror::Error;

/// 落子规则错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// 列号越界
    #[error("invalid column: {column}")]
    InvalidColumn { column: i64 },

    /// 该列已满
    #[error("column {column} is full")]
    ColumnFull { column: usize },

    /// 不是你的回合
    #[error("not your turn")]
    NotYourTurn,

    /// 不是这局的参与者
    #[error("not part of this game")]
    NotParticipant,
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// 协议版本不匹配
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 用户名为空
    #[error("username required")]
    UsernameEmpty,

    /// 用户名过长
    #[error("Username too long: {len} chars (max: {max})")]
    UsernameTooLong { len: usize, max: usize },

    /// 用户名为保留字
    #[error("username {0:?} is reserved")]
    UsernameReserved(String),

    /// 落子规则错误
    #[error("Game error: {0}")]
    Game(#[from] GameError),
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
