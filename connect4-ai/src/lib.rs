//! 四子棋机器人
//!
//! 纯函数式的启发式选点，只读棋盘快照。

mod bot;

pub use bot::Bot;
