//! 启发式机器人
//!
//! 确定性的优先级策略，不依赖随机数：
//! 1. 能直接获胜的列
//! 2. 堵住对手直接获胜的列
//! 3. 中间列
//! 4. 由中间向两侧的固定顺序
//! 5. 最左侧可落子的列

use protocol::{Board, Player, COLUMNS};
use tracing::debug;

/// 由中间向两侧的列顺序
const PREFERRED_ORDER: [usize; COLUMNS] = [3, 2, 4, 1, 5, 0, 6];

/// 机器人
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bot {
    mark: Player,
}

impl Bot {
    /// 创建执 `mark` 的机器人，对手为另一方
    pub fn new(mark: Player) -> Self {
        Self { mark }
    }

    /// 选择落子列，棋盘已满时返回 None
    pub fn choose_move(&self, board: &Board) -> Option<usize> {
        if let Some(column) = Self::winning_move(board, self.mark) {
            debug!(column, "bot takes the win");
            return Some(column);
        }
        if let Some(column) = Self::winning_move(board, self.mark.other()) {
            debug!(column, "bot blocks");
            return Some(column);
        }

        let center = COLUMNS / 2;
        if board.can_play(center) {
            return Some(center);
        }

        PREFERRED_ORDER
            .iter()
            .copied()
            .find(|&c| board.can_play(c))
            .or_else(|| board.legal_columns().first().copied())
    }

    /// 找到能让 `player` 立即连成四子的列
    fn winning_move(board: &Board, player: Player) -> Option<usize> {
        board.legal_columns().into_iter().find(|&column| {
            let mut trial = *board;
            trial.drop_disc(column, player).is_ok() && trial.winner() == Some(player)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_from(moves: &[(usize, Player)]) -> Board {
        let mut board = Board::empty();
        for &(column, player) in moves {
            board.drop_disc(column, player).unwrap();
        }
        board
    }

    #[test]
    fn test_empty_board_prefers_center() {
        let bot = Bot::new(Player::Two);
        assert_eq!(bot.choose_move(&Board::empty()), Some(3));
    }

    #[test]
    fn test_takes_win_over_block() {
        // 机器人（2 号）在第 5 列竖三，对手在第 0 列竖三
        let board = board_from(&[
            (0, Player::One),
            (5, Player::Two),
            (0, Player::One),
            (5, Player::Two),
            (0, Player::One),
            (5, Player::Two),
        ]);

        let bot = Bot::new(Player::Two);
        assert_eq!(bot.choose_move(&board), Some(5));
    }

    #[test]
    fn test_blocks_opponent() {
        // 对手在底行 1..=3 连三，第 0 列和第 4 列都能堵，取最左边的
        let board = board_from(&[
            (1, Player::One),
            (6, Player::Two),
            (2, Player::One),
            (6, Player::Two),
            (3, Player::One),
        ]);

        let bot = Bot::new(Player::Two);
        assert_eq!(bot.choose_move(&board), Some(0));
    }

    #[test]
    fn test_falls_back_from_full_center() {
        let mut board = Board::empty();
        let mut player = Player::One;
        // 填满中间列，不产生连四
        for _ in 0..6 {
            board.drop_disc(3, player).unwrap();
            player = player.other();
        }

        let bot = Bot::new(Player::One);
        assert_eq!(bot.choose_move(&board), Some(2));
    }

    #[test]
    fn test_full_board_has_no_move() {
        let mut board = Board::empty();
        let mut player = Player::One;
        for column in [0, 2, 1, 3, 4, 6, 5].repeat(6) {
            board.drop_disc(column, player).unwrap();
            player = player.other();
        }

        assert_eq!(Bot::new(Player::Two).choose_move(&board), None);
    }

    #[test]
    fn test_only_column_left() {
        let moves = [0, 2, 1, 3, 4, 6, 5].repeat(6);
        let mut board = Board::empty();
        let mut player = Player::One;
        for &column in &moves[..moves.len() - 1] {
            board.drop_disc(column, player).unwrap();
            player = player.other();
        }

        assert_eq!(board.legal_columns(), vec![5]);
        assert_eq!(Bot::new(player).choose_move(&board), Some(5));
    }
}
