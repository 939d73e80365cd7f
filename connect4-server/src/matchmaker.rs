//! 匹配系统
//!
//! 同一时刻最多一名玩家在等待。第二名玩家到来时立即配对；等待超时则与机器人开局。
//! 同时维护进行中的对局表和用户名到对局的反向索引，仅存在于进程内存中，重启即丢失。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use protocol::{Player, PlayerInfo, SessionId};

use crate::session::GameSession;

/// 匹配结果
#[derive(Debug, Clone)]
pub struct Match {
    pub session: Arc<GameSession>,
    /// 调用者的席位
    pub slot: Player,
    /// 是否回到了已有对局
    pub rejoined: bool,
}

/// 等待中的玩家
struct Waiting {
    username: String,
    ticket: u64,
    notify: oneshot::Sender<Arc<GameSession>>,
}

#[derive(Default)]
struct MatchmakerState {
    waiting: Option<Waiting>,
    /// 对局 ID -> 对局
    active: HashMap<SessionId, Arc<GameSession>>,
    /// 用户名 -> 对局 ID
    user_sessions: HashMap<String, SessionId>,
}

impl MatchmakerState {
    fn existing(&self, username: &str) -> Option<Match> {
        let session_id = self.user_sessions.get(username)?;
        let session = self.active.get(session_id)?;
        let slot = session.slot_of(username)?;
        Some(Match {
            session: Arc::clone(session),
            slot,
            rejoined: true,
        })
    }

    fn register(&mut self, session: &Arc<GameSession>) {
        let id = session.id().to_string();
        for player in session.players().iter().filter(|p| !p.is_bot) {
            self.user_sessions.insert(player.username.clone(), id.clone());
        }
        self.active.insert(id, Arc::clone(session));
    }
}

/// 一次入队尝试的结果
enum Enqueue {
    /// 已有对局
    Ready(Match),
    /// 与等待者配对成功，需要通知对方
    Paired {
        session: Arc<GameSession>,
        notify: oneshot::Sender<Arc<GameSession>>,
    },
    /// 成为等待者
    Wait {
        ticket: u64,
        rx: oneshot::Receiver<Arc<GameSession>>,
    },
    /// 同一用户名已在等待
    AlreadyWaiting,
}

/// 等待被放弃（future 被丢弃）时撤回等待条目
struct WaitGuard<'a> {
    matchmaker: &'a Matchmaker,
    ticket: u64,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.matchmaker.withdraw(self.ticket);
    }
}

/// 匹配管理器
pub struct Matchmaker {
    state: Mutex<MatchmakerState>,
    next_ticket: AtomicU64,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MatchmakerState::default()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// 等待配对
    ///
    /// 已有进行中的对局时直接返回（`rejoined = true`）。否则加入等待队列，
    /// 被配对或等待 `timeout` 后与 `bot` 开局。
    /// 同一用户名已在等待时立即返回 None，原等待者保留等待位。
    pub async fn wait_for_match(
        &self,
        username: &str,
        timeout: Duration,
        bot: PlayerInfo,
    ) -> Option<Match> {
        loop {
            match self.enqueue(username) {
                Enqueue::Ready(found) => {
                    debug!(username, session_id = %found.session.id(), "rejoining session");
                    return Some(found);
                }
                Enqueue::Paired { session, notify } => {
                    if notify.send(Arc::clone(&session)).is_ok() {
                        info!(session_id = %session.id(), username, "players paired");
                        return Some(Match {
                            session,
                            slot: Player::Two,
                            rejoined: false,
                        });
                    }
                    // 等待者已离开，撤销这局重新排队
                    warn!(session_id = %session.id(), "waiting player left before pairing");
                    self.finish(session.id());
                }
                Enqueue::Wait { ticket, rx } => {
                    return self.wait_paired(username, ticket, rx, timeout, bot).await;
                }
                Enqueue::AlreadyWaiting => {
                    debug!(username, "already waiting for an opponent");
                    return None;
                }
            }
        }
    }

    fn enqueue(&self, username: &str) -> Enqueue {
        let mut state = self.state.lock();
        if let Some(found) = state.existing(username) {
            return Enqueue::Ready(found);
        }

        match state.waiting.take() {
            Some(waiting) if waiting.username == username => {
                state.waiting = Some(waiting);
                Enqueue::AlreadyWaiting
            }
            Some(waiting) => {
                let session = Arc::new(GameSession::new(
                    PlayerInfo::human(waiting.username),
                    PlayerInfo::human(username),
                ));
                state.register(&session);
                Enqueue::Paired {
                    session,
                    notify: waiting.notify,
                }
            }
            None => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let (notify, rx) = oneshot::channel();
                state.waiting = Some(Waiting {
                    username: username.to_string(),
                    ticket,
                    notify,
                });
                Enqueue::Wait { ticket, rx }
            }
        }
    }

    async fn wait_paired(
        &self,
        username: &str,
        ticket: u64,
        mut rx: oneshot::Receiver<Arc<GameSession>>,
        timeout: Duration,
        bot: PlayerInfo,
    ) -> Option<Match> {
        let _guard = WaitGuard {
            matchmaker: self,
            ticket,
        };
        debug!(username, ?timeout, "waiting for an opponent");

        let paired = tokio::select! {
            result = &mut rx => Some(result),
            _ = tokio::time::sleep(timeout) => None,
        };
        let result = match paired {
            Some(result) => result,
            None => match self.start_bot_game(username, ticket, bot) {
                Some(found) => return Some(found),
                // 超时的同时已被配对，结果正在路上
                None => rx.await,
            },
        };

        result.ok().map(|session| Match {
            session,
            slot: Player::One,
            rejoined: false,
        })
    }

    /// 等待超时：仍持有等待位时撤回并与机器人开局
    fn start_bot_game(&self, username: &str, ticket: u64, bot: PlayerInfo) -> Option<Match> {
        let mut state = self.state.lock();
        if state.waiting.as_ref().map(|w| w.ticket) != Some(ticket) {
            return None;
        }
        state.waiting = None;

        let session = Arc::new(GameSession::new(PlayerInfo::human(username), bot));
        state.register(&session);
        info!(session_id = %session.id(), username, "no opponent found, starting bot game");
        Some(Match {
            session,
            slot: Player::One,
            rejoined: false,
        })
    }

    fn withdraw(&self, ticket: u64) {
        let mut state = self.state.lock();
        if state.waiting.as_ref().map(|w| w.ticket) == Some(ticket) {
            state.waiting = None;
            debug!(ticket, "waiting entry withdrawn");
        }
    }

    /// 对局持久化之后调用，移除对局和两名参与者的索引
    pub fn finish(&self, session_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(session) = state.active.remove(session_id) else {
            return false;
        };
        for player in session.players() {
            if state.user_sessions.get(&player.username).map(String::as_str) == Some(session_id) {
                state.user_sessions.remove(&player.username);
            }
        }
        true
    }

    /// 按 ID 获取进行中的对局
    pub fn active_session(&self, session_id: &str) -> Option<Arc<GameSession>> {
        self.state.lock().active.get(session_id).cloned()
    }

    /// 用户当前参与的对局
    pub fn session_for(&self, username: &str) -> Option<Arc<GameSession>> {
        let state = self.state.lock();
        let session_id = state.user_sessions.get(username)?;
        state.active.get(session_id).cloned()
    }

    /// 进行中的对局数量
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// `username` 是否正在等待配对
    pub fn is_waiting(&self, username: &str) -> bool {
        self.state
            .lock()
            .waiting
            .as_ref()
            .is_some_and(|w| w.username == username)
    }
}

impl Default for Matchmaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::BOT_USERNAME;

    const WAIT: Duration = Duration::from_secs(10);

    fn has_waiting(matchmaker: &Matchmaker) -> bool {
        matchmaker.state.lock().waiting.is_some()
    }

    async fn until_waiting(matchmaker: &Matchmaker, username: &str) {
        while !matchmaker.is_waiting(username) {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_wait(
        matchmaker: &Arc<Matchmaker>,
        username: &'static str,
    ) -> tokio::task::JoinHandle<Option<Match>> {
        let matchmaker = Arc::clone(matchmaker);
        tokio::spawn(async move {
            matchmaker
                .wait_for_match(username, WAIT, PlayerInfo::bot())
                .await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_starts_bot_game() {
        let matchmaker = Matchmaker::new();

        let found = matchmaker
            .wait_for_match("alice", WAIT, PlayerInfo::bot())
            .await
            .unwrap();

        assert_eq!(found.slot, Player::One);
        assert!(!found.rejoined);
        let players = found.session.players();
        assert_eq!(players[0].username, "alice");
        assert!(players[1].is_bot);
        assert_eq!(matchmaker.active_count(), 1);
        assert!(!has_waiting(&matchmaker));
        assert!(matchmaker.session_for("alice").is_some());
        assert!(matchmaker.session_for(BOT_USERNAME).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_players_share_one_session() {
        let matchmaker = Arc::new(Matchmaker::new());

        let first = spawn_wait(&matchmaker, "alice");
        until_waiting(&matchmaker, "alice").await;

        let second = matchmaker
            .wait_for_match("bob", WAIT, PlayerInfo::bot())
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first.session.id(), second.session.id());
        assert_eq!(first.slot, Player::One);
        assert_eq!(second.slot, Player::Two);
        assert_eq!(first.session.players()[0].username, "alice");
        assert_eq!(first.session.players()[1].username, "bob");
        assert_eq!(matchmaker.active_count(), 1);
        assert!(!has_waiting(&matchmaker));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_returns_same_session() {
        let matchmaker = Arc::new(Matchmaker::new());

        let first = spawn_wait(&matchmaker, "alice");
        until_waiting(&matchmaker, "alice").await;
        let second = matchmaker
            .wait_for_match("bob", WAIT, PlayerInfo::bot())
            .await
            .unwrap();
        first.await.unwrap().unwrap();

        let again = matchmaker
            .wait_for_match("alice", WAIT, PlayerInfo::bot())
            .await
            .unwrap();
        assert!(again.rejoined);
        assert_eq!(again.slot, Player::One);
        assert_eq!(again.session.id(), second.session.id());
        assert_eq!(matchmaker.active_count(), 1);
        assert!(!has_waiting(&matchmaker));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_clears_indexes() {
        let matchmaker = Matchmaker::new();
        let found = matchmaker
            .wait_for_match("alice", WAIT, PlayerInfo::bot())
            .await
            .unwrap();
        let id = found.session.id().to_string();

        assert!(matchmaker.finish(&id));
        assert!(!matchmaker.finish(&id));
        assert!(matchmaker.active_session(&id).is_none());
        assert!(matchmaker.session_for("alice").is_none());

        let next = matchmaker
            .wait_for_match("alice", WAIT, PlayerInfo::bot())
            .await
            .unwrap();
        assert!(!next.rejoined);
        assert_ne!(next.session.id(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_join_keeps_original_waiter() {
        let matchmaker = Arc::new(Matchmaker::new());

        let first = spawn_wait(&matchmaker, "alice");
        until_waiting(&matchmaker, "alice").await;

        let repeat = matchmaker
            .wait_for_match("alice", WAIT, PlayerInfo::bot())
            .await;
        assert!(repeat.is_none());
        assert!(matchmaker.is_waiting("alice"));
        assert_eq!(matchmaker.active_count(), 0);

        let bob = matchmaker
            .wait_for_match("bob", WAIT, PlayerInfo::bot())
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.slot, Player::One);
        assert_eq!(first.session.id(), bob.session.id());
        assert_eq!(matchmaker.active_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_loses_to_pairing_in_flight() {
        let matchmaker = Matchmaker::new();

        let Enqueue::Wait { ticket, rx } = matchmaker.enqueue("alice") else {
            panic!("alice should wait");
        };
        let Enqueue::Paired { session, notify } = matchmaker.enqueue("bob") else {
            panic!("bob should pair with alice");
        };

        // 超时发生在配对之后、通知送达之前
        assert!(matchmaker
            .start_bot_game("alice", ticket, PlayerInfo::bot())
            .is_none());
        assert!(notify.send(Arc::clone(&session)).is_ok());

        let received = rx.await.unwrap();
        assert_eq!(received.id(), session.id());
        assert_eq!(received.slot_of("alice"), Some(Player::One));
        assert!(received.bot_slot().is_none());
        assert_eq!(matchmaker.active_count(), 1);
        assert!(!has_waiting(&matchmaker));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_with_departed_waiter_requeues() {
        let matchmaker = Matchmaker::new();

        let Enqueue::Wait { rx, .. } = matchmaker.enqueue("alice") else {
            panic!("alice should wait");
        };
        drop(rx);

        let found = matchmaker
            .wait_for_match("bob", WAIT, PlayerInfo::bot())
            .await
            .unwrap();

        // 与 alice 的对局被撤销，bob 重新排队后与机器人开局
        assert_eq!(found.slot, Player::One);
        assert_eq!(found.session.players()[0].username, "bob");
        assert!(found.session.players()[1].is_bot);
        assert_eq!(matchmaker.active_count(), 1);
        assert!(matchmaker.session_for("alice").is_none());
        assert!(!has_waiting(&matchmaker));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_is_withdrawn() {
        let matchmaker = Arc::new(Matchmaker::new());

        let waiter = spawn_wait(&matchmaker, "alice");
        until_waiting(&matchmaker, "alice").await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert!(!has_waiting(&matchmaker));
        assert_eq!(matchmaker.active_count(), 0);
    }
}
