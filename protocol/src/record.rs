//! 对局记录格式
//!
//! 走法日志既用于快照回放，也用于结束后持久化。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::error::GameError;
use crate::player::Player;

/// 单步走法记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// 落子列
    pub column: usize,
    /// 落子用户名
    pub by: String,
}

impl MoveRecord {
    pub fn new(column: usize, by: impl Into<String>) -> Self {
        Self {
            column,
            by: by.into(),
        }
    }
}

/// 按走法日志从空棋盘重放
///
/// `first` 为先手用户名，其余落子归后手。
pub fn replay(moves: &[MoveRecord], first: &str) -> Result<Board, GameError> {
    let mut board = Board::empty();
    for mv in moves {
        let player = if mv.by == first { Player::One } else { Player::Two };
        board.drop_disc(mv.column, player)?;
    }
    Ok(board)
}

/// 已结束对局的持久化记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedGame {
    /// 对局 ID
    pub id: String,
    /// 先手用户名
    pub player1: String,
    /// 后手用户名
    pub player2: String,
    /// 胜者用户名，和棋为空
    pub winner: String,
    /// 走法列表
    pub moves: Vec<MoveRecord>,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FinishedGame {
    /// 是否和棋
    pub fn is_draw(&self) -> bool {
        self.winner.is_empty()
    }

    /// 转换为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 从 JSON 字符串解析
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// 排行榜行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub username: String,
    pub wins: u64,
}
