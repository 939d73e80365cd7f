//! 对局状态机
//!
//! 对局在创建时即进入进行中状态，因连四、满盘或判负进入结束状态，之后不再变化。
//! 所有可变字段由对局独占，只能通过 `apply_move` / `forfeit` / `snapshot` 访问。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use connect4_ai::Bot;
use protocol::{
    Board, GameError, GameSnapshot, MoveRecord, Player, PlayerInfo, SessionId, COLUMNS, ROWS,
};

/// 落子结果
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    /// 落子后的状态
    pub state: GameSnapshot,
    /// 是否真的落了子（对局已结束时为 false）
    pub applied: bool,
}

impl MoveOutcome {
    /// 这一步是否使对局结束
    pub fn finished_now(&self) -> bool {
        self.applied && self.state.done
    }
}

/// 受锁保护的可变状态
#[derive(Debug)]
struct SessionInner {
    board: Board,
    turn: Player,
    winner: Option<Player>,
    done: bool,
    updated_at: DateTime<Utc>,
    moves: Vec<MoveRecord>,
}

/// 一局对局
#[derive(Debug)]
pub struct GameSession {
    id: SessionId,
    players: [PlayerInfo; 2],
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

impl GameSession {
    /// 创建新对局，1 号先手
    pub fn new(player1: PlayerInfo, player2: PlayerInfo) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            players: [player1, player2],
            created_at: now,
            inner: Mutex::new(SessionInner {
                board: Board::empty(),
                turn: Player::One,
                winner: None,
                done: false,
                updated_at: now,
                moves: Vec::with_capacity(ROWS * COLUMNS),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn players(&self) -> &[PlayerInfo; 2] {
        &self.players
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

    /// 机器人所在席位
    pub fn bot_slot(&self) -> Option<Player> {
        [Player::One, Player::Two]
            .into_iter()
            .find(|slot| self.players[slot.index()].is_bot)
    }

    /// 棋盘副本
    pub fn board(&self) -> Board {
        self.inner.lock().board
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().done
    }

    /// 当前走子方
    pub fn current_player(&self) -> &PlayerInfo {
        let turn = self.inner.lock().turn;
        &self.players[turn.index()]
    }

    /// 落子
    ///
    /// 已结束的对局直接返回当前状态（`applied = false`），不视为错误。
    pub fn apply_move(&self, username: &str, column: i64) -> Result<MoveOutcome, GameError> {
        let mut inner = self.inner.lock();
        self.apply_locked(&mut inner, username, column)
    }

    /// 如果轮到机器人，在同一次加锁内选点并落子
    ///
    /// 返回机器人落子的列和结果；不是机器人回合或对局已结束时返回 None。
    pub fn play_bot_turn(&self) -> Option<(usize, MoveOutcome)> {
        let bot_slot = self.bot_slot()?;
        let mut inner = self.inner.lock();
        if inner.done || inner.turn != bot_slot {
            return None;
        }

        let column = Bot::new(bot_slot).choose_move(&inner.board)?;
        let username = self.players[bot_slot.index()].username.clone();
        match self.apply_locked(&mut inner, &username, column as i64) {
            Ok(outcome) => Some((column, outcome)),
            Err(e) => {
                warn!(session_id = %self.id, column, error = %e, "bot move rejected");
                None
            }
        }
    }

    /// 判负
    ///
    /// 返回结束后的状态和获胜方用户名；对局已结束或 `loser` 不是参与者时不做任何改动，
    /// 获胜方为 None。
    pub fn forfeit(&self, loser: &str) -> (GameSnapshot, Option<String>) {
        self.forfeit_unless(loser, || false)
    }

    /// 判负，但 `present` 在对局锁内返回 true 时放弃
    ///
    /// 检查与判负在同一次加锁内完成，对局结束前的其它改动不会插入两者之间。
    pub fn forfeit_unless(
        &self,
        loser: &str,
        present: impl FnOnce() -> bool,
    ) -> (GameSnapshot, Option<String>) {
        let mut inner = self.inner.lock();
        if inner.done || present() {
            return (self.snapshot_locked(&inner), None);
        }
        let Some(slot) = self.slot_of(loser) else {
            return (self.snapshot_locked(&inner), None);
        };

        let winner = slot.other();
        inner.winner = Some(winner);
        inner.done = true;
        inner.updated_at = Utc::now();

        let opponent = self.players[winner.index()].username.clone();
        (self.snapshot_locked(&inner), Some(opponent))
    }

    /// 获取独立的状态副本
    pub fn snapshot(&self) -> GameSnapshot {
        let inner = self.inner.lock();
        self.snapshot_locked(&inner)
    }

    fn apply_locked(
        &self,
        inner: &mut SessionInner,
        username: &str,
        column: i64,
    ) -> Result<MoveOutcome, GameError> {
        if inner.done {
            return Ok(MoveOutcome {
                state: self.snapshot_locked(inner),
                applied: false,
            });
        }

        let slot = self.slot_of(username).ok_or(GameError::NotParticipant)?;
        if slot != inner.turn {
            return Err(GameError::NotYourTurn);
        }
        let column = usize::try_from(column).map_err(|_| GameError::InvalidColumn { column })?;
        inner.board.drop_disc(column, slot)?;

        inner.moves.push(MoveRecord::new(column, username));
        if let Some(winner) = inner.board.winner() {
            inner.winner = Some(winner);
            inner.done = true;
        } else if inner.board.is_full() {
            inner.done = true;
        } else {
            inner.turn = inner.turn.other();
        }
        inner.updated_at = Utc::now();

        Ok(MoveOutcome {
            state: self.snapshot_locked(inner),
            applied: true,
        })
    }

    fn snapshot_locked(&self, inner: &SessionInner) -> GameSnapshot {
        GameSnapshot {
            id: self.id.clone(),
            board: inner.board,
            players: self.players.clone(),
            turn: inner.turn,
            winner: inner.winner,
            done: inner.done,
            created_at: self.created_at,
            updated_at: inner.updated_at,
            moves: inner.moves.clone(),
        }
    }
}
