//! 四子棋共享协议库
//!
//! 包含:
//! - 棋盘、席位等核心数据结构
//! - 落子与连四判定
//! - 消息类型定义 (ClientMessage, ServerMessage, GameSnapshot)
//! - 传输层抽象 (Connector, Connection, Listener traits)
//! - 帧编解码
//! - 对局记录格式

mod board;
mod constants;
mod error;
mod message;
mod player;
mod record;
mod transport;

pub use board::Board;
pub use constants::*;
pub use error::{GameError, ProtocolError, Result};
pub use message::{ClientMessage, GameSnapshot, ServerMessage, SessionId};
pub use player::{validate_username, Player, PlayerInfo};
pub use record::{replay, FinishedGame, LeaderboardRow, MoveRecord};
pub use transport::{
    encode_frame, Connection, Connector, FrameReader, FrameWriter, Listener, TcpConnection,
    TcpConnector, TcpListener,
};
