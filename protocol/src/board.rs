//! 棋盘状态
//!
//! 6 行 × 7 列，第 0 行在最上方，棋子从最下方（第 5 行）开始堆叠。

use serde::{Deserialize, Serialize};

use crate::constants::{COLUMNS, CONNECT, ROWS};
use crate::error::GameError;
use crate::player::Player;

/// 检查连子的四个方向：横、竖、两条斜线
const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

/// 棋盘
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: [[Option<Player>; COLUMNS]; ROWS],
}

impl Board {
    /// 创建空棋盘
    pub fn empty() -> Self {
        Self::default()
    }

    /// 获取指定格子的归属
    pub fn get(&self, row: usize, column: usize) -> Option<Player> {
        self.cells.get(row)?.get(column).copied().flatten()
    }

    /// 该列是否还能落子
    pub fn can_play(&self, column: usize) -> bool {
        column < COLUMNS && self.cells[0][column].is_none()
    }

    /// 所有可落子的列（从左到右）
    pub fn legal_columns(&self) -> Vec<usize> {
        (0..COLUMNS).filter(|&c| self.can_play(c)).collect()
    }

    /// 在指定列落子，返回落到的行号
    pub fn drop_disc(&mut self, column: usize, player: Player) -> Result<usize, GameError> {
        if column >= COLUMNS {
            return Err(GameError::InvalidColumn {
                column: i64::try_from(column).unwrap_or(i64::MAX),
            });
        }
        for row in (0..ROWS).rev() {
            if self.cells[row][column].is_none() {
                self.cells[row][column] = Some(player);
                return Ok(row);
            }
        }
        Err(GameError::ColumnFull { column })
    }

    /// 顶行没有空位即为满
    pub fn is_full(&self) -> bool {
        self.cells[0].iter().all(Option::is_some)
    }

    /// 已落子数
    pub fn occupied(&self) -> usize {
        self.cells.iter().flatten().filter(|c| c.is_some()).count()
    }

    /// 检查是否有玩家连成四子
    pub fn winner(&self) -> Option<Player> {
        for row in 0..ROWS {
            for column in 0..COLUMNS {
                let Some(player) = self.cells[row][column] else {
                    continue;
                };
                if DIRECTIONS
                    .iter()
                    .any(|&(dr, dc)| self.streak(row, column, dr, dc, player))
                {
                    return Some(player);
                }
            }
        }
        None
    }

    /// 从 (row, column) 沿方向 (dr, dc) 是否连续 CONNECT 个同色子
    fn streak(&self, row: usize, column: usize, dr: isize, dc: isize, player: Player) -> bool {
        (1..CONNECT as isize).all(|i| {
            let r = row as isize + dr * i;
            let c = column as isize + dc * i;
            r >= 0
                && c >= 0
                && self.get(r as usize, c as usize) == Some(player)
        })
    }
}
