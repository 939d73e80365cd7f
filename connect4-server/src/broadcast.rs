//! 状态广播
//!
//! 把对局快照按接收者个性化后推送给对局内的所有连接。

use tracing::{debug, warn};

use protocol::{GameSnapshot, ServerMessage};

use crate::registry::ConnectionRegistry;

/// 向对局内所有连接推送状态，返回成功投递的数量
///
/// 投递不阻塞：出站队列已满或已关闭的连接只记录日志，不影响其它接收者。
pub fn broadcast_state(
    registry: &ConnectionRegistry,
    snapshot: &GameSnapshot,
    message: Option<&str>,
) -> usize {
    let mut delivered = 0;
    for connection in registry.connections(&snapshot.id) {
        let msg = ServerMessage::state_for(snapshot, connection.username(), false, message);
        match connection.sender().try_send(msg) {
            Ok(()) => delivered += 1,
            Err(e) => warn!(
                session_id = %snapshot.id,
                username = connection.username(),
                error = %e,
                "failed to deliver state"
            ),
        }
    }
    debug!(session_id = %snapshot.id, delivered, "state broadcast");
    delivered
}
