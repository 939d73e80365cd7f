//! 服务器主逻辑
//!
//! 每条连接一个读任务和一个写任务。读任务完成握手、匹配，然后处理客户端消息；
//! 写任务把出站队列里的消息写到网络。连接断开后启动断线宽限计时，到期仍未重连则判负。

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use protocol::{
    validate_username, ClientMessage, Connection, FinishedGame, FrameReader, FrameWriter,
    GameSnapshot, Listener, PlayerInfo, ProtocolError, ServerMessage, TcpConnection, TcpListener,
    CONNECT_TIMEOUT,
};

use crate::broadcast::broadcast_state;
use crate::config::ServerConfig;
use crate::events::{emit_detached, EventKind, EventSink, GameEvent};
use crate::matchmaker::Matchmaker;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::session::GameSession;
use crate::storage::GameStore;

/// 每条连接的出站队列长度
const OUTBOUND_QUEUE: usize = 32;

/// accept 失败后的退避时间
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// 游戏服务器
pub struct GameServer {
    config: ServerConfig,
    matchmaker: Matchmaker,
    registry: ConnectionRegistry,
    store: Arc<dyn GameStore>,
    events: Arc<dyn EventSink>,
}

impl GameServer {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn GameStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            matchmaker: Matchmaker::new(),
            registry: ConnectionRegistry::new(),
            store,
            events,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn matchmaker(&self) -> &Matchmaker {
        &self.matchmaker
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// 接受连接直到监听器出错退出
    pub async fn run(self: Arc<Self>, mut listener: TcpListener) -> anyhow::Result<()> {
        info!(addr = ?listener.local_addr(), "server listening");
        loop {
            match listener.accept().await {
                Ok(conn) => {
                    debug!(peer = ?conn.peer_addr(), "connection accepted");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(conn).await {
                            debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// 处理单条连接的完整生命周期
    async fn handle_connection(self: Arc<Self>, conn: TcpConnection) -> anyhow::Result<()> {
        let (mut reader, mut writer) = conn.split();

        let username = match handshake(&mut reader).await {
            Ok(username) => username,
            Err(e) => {
                let _ = writer.send(&ServerMessage::error(e.to_string())).await;
                let _ = writer.shutdown().await;
                return Err(e);
            }
        };

        let found = self
            .matchmaker
            .wait_for_match(&username, self.config.bot_wait(), PlayerInfo::bot())
            .await;
        let Some(found) = found else {
            debug!(username = %username, "join rejected, already waiting");
            let _ = writer
                .send(&ServerMessage::error("already waiting for an opponent"))
                .await;
            let _ = writer.shutdown().await;
            return Ok(());
        };

        let session = found.session;
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let handle = self.registry.register(session.id(), &username, tx);
        let writer_task = tokio::spawn(write_loop(writer, rx));
        info!(
            session_id = %session.id(),
            username = %username,
            slot = found.slot.number(),
            rejoined = found.rejoined,
            "player joined"
        );

        let snapshot = session.snapshot();
        reply(
            &handle,
            ServerMessage::state_for(&snapshot, &username, found.rejoined, None),
        )
        .await;
        broadcast_state(&self.registry, &snapshot, None);
        self.emit(EventKind::Joined, session.id(), json!({ "player": username }));

        let result = self.read_loop(&session, &username, &handle, &mut reader).await;

        if self.registry.unregister(session.id(), &username, handle.id()) {
            debug!(session_id = %session.id(), username = %username, "connection unregistered");
        }
        drop(handle);
        let _ = writer_task.await;

        self.spawn_forfeit_timer(session, username);
        result
    }

    async fn read_loop(
        &self,
        session: &Arc<GameSession>,
        username: &str,
        handle: &ConnectionHandle,
        reader: &mut FrameReader<OwnedReadHalf>,
    ) -> anyhow::Result<()> {
        let closed = handle.closed();
        loop {
            let received = tokio::select! {
                _ = closed.notified() => {
                    debug!(session_id = %session.id(), username, "connection replaced");
                    return Ok(());
                }
                received = reader.recv::<ClientMessage>() => received,
            };

            let msg = match received {
                Ok(msg) => msg,
                Err(ProtocolError::Json(e)) => {
                    debug!(username, error = %e, "unreadable message");
                    reply(handle, ServerMessage::error("unknown message")).await;
                    continue;
                }
                Err(ProtocolError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            debug!(session_id = %session.id(), username, ?msg, "received message");
            self.handle_message(session, username, handle, msg).await;
        }
    }

    async fn handle_message(
        &self,
        session: &Arc<GameSession>,
        username: &str,
        handle: &ConnectionHandle,
        msg: ClientMessage,
    ) {
        match msg {
            ClientMessage::Move { column } => {
                self.handle_move(session, username, handle, column).await;
            }
            ClientMessage::Ping => reply(handle, ServerMessage::Pong).await,
            ClientMessage::Reconnect => {
                let snapshot = session.snapshot();
                reply(handle, ServerMessage::state_for(&snapshot, username, true, None)).await;
            }
            ClientMessage::Leaderboard { limit } => {
                let limit = limit.unwrap_or(self.config.leaderboard_limit);
                let msg = match self.store.leaderboard(limit).await {
                    Ok(rows) => ServerMessage::Leaderboard { rows },
                    Err(e) => {
                        warn!(error = ?e, "leaderboard query failed");
                        ServerMessage::error("leaderboard unavailable")
                    }
                };
                reply(handle, msg).await;
            }
            ClientMessage::Join { .. } => {
                reply(handle, ServerMessage::error("already joined")).await;
            }
        }
    }

    async fn handle_move(
        &self,
        session: &Arc<GameSession>,
        username: &str,
        handle: &ConnectionHandle,
        column: i64,
    ) {
        let outcome = match session.apply_move(username, column) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(session_id = %session.id(), username, column, error = %e, "move rejected");
                reply(handle, ServerMessage::error(e.to_string())).await;
                return;
            }
        };

        broadcast_state(&self.registry, &outcome.state, None);
        if outcome.finished_now() {
            self.finalize(&outcome.state).await;
        }

        self.play_bot(session).await;
    }

    /// 轮到机器人时立即落子
    async fn play_bot(&self, session: &GameSession) {
        let Some((column, outcome)) = session.play_bot_turn() else {
            return;
        };

        debug!(session_id = %session.id(), column, "bot moved");
        self.emit(EventKind::BotMove, session.id(), json!({ "column": column }));
        broadcast_state(&self.registry, &outcome.state, None);
        if outcome.finished_now() {
            self.finalize(&outcome.state).await;
        }
    }

    /// 对局正常结束：持久化、移出匹配表、发送事件
    async fn finalize(&self, state: &GameSnapshot) {
        let record = self.persist(state).await;
        info!(session_id = %state.id, winner = %record.winner, moves = record.moves.len(), "game finished");
        self.emit(
            EventKind::Finished,
            &state.id,
            json!({ "winner": record.winner, "moves": record.moves }),
        );
    }

    /// 保存失败只记录日志，匹配表照常清理
    async fn persist(&self, state: &GameSnapshot) -> FinishedGame {
        let record = state.to_record();
        if let Err(e) = self.store.save_finished_game(&record).await {
            warn!(session_id = %state.id, error = ?e, "failed to persist finished game");
        }
        self.matchmaker.finish(&state.id);
        record
    }

    fn spawn_forfeit_timer(self: &Arc<Self>, session: Arc<GameSession>, username: String) {
        let server = Arc::clone(self);
        let grace = self.config.reconnect_grace();
        debug!(session_id = %session.id(), username = %username, ?grace, "disconnect grace started");
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            server.expire_grace(&session, &username).await;
        });
    }

    /// 断线宽限到期
    ///
    /// 用户已重连或对局已结束时什么也不做；否则判负并通知对手。返回是否判负。
    pub async fn expire_grace(&self, session: &GameSession, username: &str) -> bool {
        let (state, opponent) = session.forfeit_unless(username, || {
            self.registry.is_connected(session.id(), username)
        });
        let Some(opponent) = opponent else {
            debug!(session_id = %session.id(), username, "grace expired without forfeit");
            return false;
        };

        info!(session_id = %session.id(), loser = username, winner = %opponent, "player forfeited");
        self.persist(&state).await;
        self.emit(
            EventKind::Forfeit,
            session.id(),
            json!({ "loser": username, "winner": opponent }),
        );
        broadcast_state(&self.registry, &state, Some("forfeit"));
        true
    }

    fn emit(&self, kind: EventKind, game_id: &str, payload: serde_json::Value) {
        emit_detached(&self.events, GameEvent::new(kind, game_id, payload));
    }
}

/// 等待第一帧 `join` 并校验用户名
async fn handshake(reader: &mut FrameReader<OwnedReadHalf>) -> anyhow::Result<String> {
    let first = tokio::time::timeout(CONNECT_TIMEOUT, reader.recv::<ClientMessage>())
        .await
        .map_err(|_| ProtocolError::ConnectionTimeout)??;

    match first {
        ClientMessage::Join { username } => Ok(validate_username(&username)?),
        _ => anyhow::bail!("join required"),
    }
}

async fn reply(handle: &ConnectionHandle, msg: ServerMessage) {
    if handle.sender().send(msg).await.is_err() {
        debug!(username = handle.username(), "outbound queue closed");
    }
}

async fn write_loop(mut writer: FrameWriter<OwnedWriteHalf>, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = writer.send(&msg).await {
            debug!(error = %e, "write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
