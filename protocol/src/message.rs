//! 消息类型定义
//!
//! 线上格式为 JSON，按 `type` 字段区分消息种类。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::player::{Player, PlayerInfo};
use crate::record::{FinishedGame, LeaderboardRow, MoveRecord};

/// 对局 ID
pub type SessionId = String;

/// 对局快照
///
/// 与对局内部锁完全解耦的独立副本，用于广播和持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub id: SessionId,
    pub board: Board,
    pub players: [PlayerInfo; 2],
    /// 当前走子方
    pub turn: Player,
    pub winner: Option<Player>,
    pub done: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub moves: Vec<MoveRecord>,
}

impl GameSnapshot {
    /// 当前走子方的玩家信息
    pub fn current_player(&self) -> &PlayerInfo {
        &self.players[self.turn.index()]
    }

    /// 用户名对应的席位
    pub fn slot_of(&self, username: &str) -> Option<Player> {
        if self.players[0].username == username {
            Some(Player::One)
        } else if self.players[1].username == username {
            Some(Player::Two)
        } else {
            None
        }
    }

    /// 对手用户名
    pub fn opponent_of(&self, username: &str) -> Option<&str> {
        self.slot_of(username)
            .map(|slot| self.players[slot.other().index()].username.as_str())
    }

    /// 胜者用户名
    pub fn winner_name(&self) -> Option<&str> {
        self.winner
            .map(|slot| self.players[slot.index()].username.as_str())
    }

    /// 是否轮到该用户，对局结束后行棋方保持最后一步时的值
    pub fn is_turn_of(&self, username: &str) -> bool {
        self.current_player().username == username
    }

    /// 生成持久化记录，以最后更新时间作为结束时间
    pub fn to_record(&self) -> FinishedGame {
        FinishedGame {
            id: self.id.clone(),
            player1: self.players[0].username.clone(),
            player2: self.players[1].username.clone(),
            winner: self.winner_name().unwrap_or_default().to_string(),
            moves: self.moves.clone(),
            created_at: self.created_at,
            finished_at: self.updated_at,
        }
    }
}

/// 客户端发送给服务端的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 加入匹配（连接后的第一条消息）
    Join { username: String },
    /// 落子
    Move { column: i64 },
    /// 心跳请求
    Ping,
    /// 请求重新同步当前状态
    Reconnect,
    /// 查询排行榜
    Leaderboard {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// 对局状态（按接收者个性化）
    State {
        session_id: SessionId,
        state: Box<GameSnapshot>,
        your_turn: bool,
        opponent: String,
        reconnect: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// 心跳响应
    Pong,
    /// 错误消息
    Error { message: String },
    /// 排行榜
    Leaderboard { rows: Vec<LeaderboardRow> },
}

impl ServerMessage {
    /// 为指定接收者生成状态消息
    pub fn state_for(
        snapshot: &GameSnapshot,
        username: &str,
        reconnect: bool,
        message: Option<&str>,
    ) -> Self {
        ServerMessage::State {
            session_id: snapshot.id.clone(),
            state: Box::new(snapshot.clone()),
            your_turn: snapshot.is_turn_of(username),
            opponent: snapshot.opponent_of(username).unwrap_or_default().to_string(),
            reconnect,
            message: message.map(str::to_string),
        }
    }

    /// 错误消息
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
