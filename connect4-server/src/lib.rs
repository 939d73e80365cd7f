//! 四子棋服务端
//!
//! 包含:
//! - 对局状态机
//! - 匹配系统（超时后与机器人对战）
//! - 连接注册与断线判负
//! - 状态广播
//! - 对局存储与事件

pub mod broadcast;
pub mod config;
pub mod events;
pub mod matchmaker;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;

pub use broadcast::broadcast_state;
pub use config::ServerConfig;
pub use events::{
    EventKind, EventSink, GameEvent, JsonLinesEventSink, NoopEventSink, TracingEventSink,
};
pub use matchmaker::{Match, Matchmaker};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use server::GameServer;
pub use session::{GameSession, MoveOutcome};
pub use storage::{GameStore, JsonFileStore, MemoryStore};
