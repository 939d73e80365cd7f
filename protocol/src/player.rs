//! 玩家席位与玩家信息

use serde::{Deserialize, Serialize};

use crate::constants::{BOT_USERNAME, MAX_USERNAME_LEN};
use crate::error::{self, ProtocolError};

/// 玩家席位（1 号先手，2 号后手）
///
/// 线上格式为数字 1 / 2。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Player {
    One,
    Two,
}

impl Player {
    /// 获取对方席位
    pub fn other(self) -> Self {
        match self {
            Player::One => Player::Two,
            Player::Two => Player::One,
        }
    }

    /// 席位编号（1 或 2）
    pub fn number(self) -> u8 {
        match self {
            Player::One => 1,
            Player::Two => 2,
        }
    }

    /// 在双人数组中的下标
    pub fn index(self) -> usize {
        match self {
            Player::One => 0,
            Player::Two => 1,
        }
    }
}

impl From<Player> for u8 {
    fn from(player: Player) -> Self {
        player.number()
    }
}

impl TryFrom<u8> for Player {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Player::One),
            2 => Ok(Player::Two),
            other => Err(format!("invalid player number: {other}")),
        }
    }
}

/// 席位上的玩家信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub username: String,
    pub is_bot: bool,
}

impl PlayerInfo {
    /// 真人玩家
    pub fn human(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            is_bot: false,
        }
    }

    /// 机器人玩家（使用保留用户名）
    pub fn bot() -> Self {
        Self {
            username: BOT_USERNAME.to_string(),
            is_bot: true,
        }
    }
}

/// 校验用户名，返回去掉首尾空白后的用户名
pub fn validate_username(username: &str) -> error::Result<String> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ProtocolError::UsernameEmpty);
    }
    let len = username.chars().count();
    if len > MAX_USERNAME_LEN {
        return Err(ProtocolError::UsernameTooLong {
            len,
            max: MAX_USERNAME_LEN,
        });
    }
    if username.eq_ignore_ascii_case(BOT_USERNAME) {
        return Err(ProtocolError::UsernameReserved(username.to_string()));
    }
    Ok(username.to_string())
}
