//! 对局存储
//!
//! 对局结束后写入一份记录，排行榜从已保存的记录中统计。

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use protocol::{FinishedGame, LeaderboardRow};

/// 对局存储接口
#[async_trait]
pub trait GameStore: Send + Sync {
    /// 保存已结束的对局，同一 ID 重复保存不做任何改动
    async fn save_finished_game(&self, game: &FinishedGame) -> Result<()>;

    /// 按胜场降序的排行榜，至多 `limit` 行，和棋不计
    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardRow>>;
}

/// 统计胜场，胜场相同按用户名排序
fn rank<'a>(games: impl IntoIterator<Item = &'a FinishedGame>, limit: usize) -> Vec<LeaderboardRow> {
    let mut wins: HashMap<&str, u64> = HashMap::new();
    for game in games.into_iter().filter(|g| !g.is_draw()) {
        *wins.entry(game.winner.as_str()).or_default() += 1;
    }

    let mut rows: Vec<LeaderboardRow> = wins
        .into_iter()
        .map(|(username, wins)| LeaderboardRow {
            username: username.to_string(),
            wins,
        })
        .collect();
    rows.sort_by(|a, b| b.wins.cmp(&a.wins).then_with(|| a.username.cmp(&b.username)));
    rows.truncate(limit);
    rows
}

/// JSON 文件存储，每局一个文件
pub struct JsonFileStore {
    games_dir: PathBuf,
}

impl JsonFileStore {
    /// 在 `data_dir/games` 下创建存储
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let games_dir = data_dir.as_ref().join("games");
        std::fs::create_dir_all(&games_dir)
            .with_context(|| format!("无法创建存储目录: {:?}", games_dir))?;
        Ok(Self { games_dir })
    }

    /// 获取存储目录路径
    pub fn games_directory(&self) -> &Path {
        &self.games_dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.games_dir.join(format!("{}.json", sanitize_filename(id)))
    }

    fn temp_path_for(&self, id: &str) -> PathBuf {
        self.games_dir
            .join(format!("{}.{}.tmp", sanitize_filename(id), Uuid::new_v4().simple()))
    }

    async fn load_all(&self) -> Result<Vec<FinishedGame>> {
        let mut games = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.games_dir)
            .await
            .with_context(|| format!("读取存储目录失败: {:?}", self.games_dir))?;

        while let Some(entry) = entries.next_entry().await.context("读取目录项失败")? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("读取文件失败: {:?}", path))?;
            match FinishedGame::from_json(&content) {
                Ok(game) => games.push(game),
                // 跳过损坏的文件
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable game record"),
            }
        }
        Ok(games)
    }
}

#[async_trait]
impl GameStore for JsonFileStore {
    async fn save_finished_game(&self, game: &FinishedGame) -> Result<()> {
        let path = self.path_for(&game.id);
        let json = game.to_json().context("序列化对局记录失败")?;

        // 先写临时文件，写完整后再以硬链接发布，目标已存在时链接失败
        let temp = self.temp_path_for(&game.id);
        let published = match write_new(&temp, json.as_bytes()).await {
            Ok(()) => match tokio::fs::hard_link(&temp, &path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e).with_context(|| format!("发布文件失败: {:?}", path)),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %temp.display(), error = %e, "failed to remove temp file");
            }
        }

        if published? {
            debug!(game_id = %game.id, path = %path.display(), "game saved");
        } else {
            debug!(game_id = %game.id, "game already saved");
        }
        Ok(())
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardRow>> {
        let games = self.load_all().await?;
        Ok(rank(&games, limit))
    }
}

/// 内存存储
#[derive(Default)]
pub struct MemoryStore {
    games: Mutex<HashMap<String, FinishedGame>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已保存的对局
    pub fn get(&self, id: &str) -> Option<FinishedGame> {
        self.games.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.games.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.lock().is_empty()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn save_finished_game(&self, game: &FinishedGame) -> Result<()> {
        self.games
            .lock()
            .entry(game.id.clone())
            .or_insert_with(|| game.clone());
        Ok(())
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardRow>> {
        let games = self.games.lock();
        Ok(rank(games.values(), limit))
    }
}

/// 创建并完整写入新文件
async fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .with_context(|| format!("创建文件失败: {:?}", path))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("写入文件失败: {:?}", path))?;
    file.sync_all().await.context("刷新文件失败")?;
    Ok(())
}

/// 获取跨平台数据目录
pub fn default_data_dir() -> Result<PathBuf> {
    let app_data_dir = dirs::data_dir().context("无法获取应用数据目录")?;
    Ok(app_data_dir.join("four-in-a-row"))
}

/// 清理文件名中的特殊字符
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '.' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use protocol::MoveRecord;
    use tempfile::TempDir;

    fn game(id: &str, player1: &str, player2: &str, winner: &str) -> FinishedGame {
        FinishedGame {
            id: id.to_string(),
            player1: player1.to_string(),
            player2: player2.to_string(),
            winner: winner.to_string(),
            moves: vec![MoveRecord::new(3, player1)],
            created_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn sample_games() -> Vec<FinishedGame> {
        vec![
            game("g1", "alice", "bob", "bob"),
            game("g2", "carol", "bot", "bot"),
            game("g3", "alice", "bob", "alice"),
            game("g4", "bob", "carol", "bob"),
            game("g5", "alice", "carol", ""),
        ]
    }

    fn create_test_store() -> (JsonFileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_rank_orders_by_wins_then_name() {
        let rows = rank(&sample_games(), 10);
        let names: Vec<_> = rows.iter().map(|r| (r.username.as_str(), r.wins)).collect();
        assert_eq!(names, vec![("bob", 2), ("alice", 1), ("bot", 1)]);

        assert_eq!(rank(&sample_games(), 1).len(), 1);
        assert!(rank(&sample_games(), 0).is_empty());
    }

    #[tokio::test]
    async fn test_json_store_save_and_rank() {
        let (store, _temp) = create_test_store();
        for g in sample_games() {
            store.save_finished_game(&g).await.unwrap();
        }

        let rows = store.leaderboard(2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].username, "bob");
        assert_eq!(rows[0].wins, 2);
        assert_eq!(rows[1].username, "alice");
    }

    #[tokio::test]
    async fn test_json_store_is_idempotent() {
        let (store, _temp) = create_test_store();
        let first = game("g1", "alice", "bob", "alice");
        let second = game("g1", "alice", "bob", "bob");

        store.save_finished_game(&first).await.unwrap();
        store.save_finished_game(&second).await.unwrap();

        let files = std::fs::read_dir(store.games_directory()).unwrap().count();
        assert_eq!(files, 1);
        let rows = store.leaderboard(10).await.unwrap();
        assert_eq!(rows, vec![LeaderboardRow { username: "alice".to_string(), wins: 1 }]);
    }

    #[tokio::test]
    async fn test_json_store_leaves_no_temp_files() {
        let (store, _temp) = create_test_store();
        let g = game("g1", "alice", "bob", "alice");
        store.save_finished_game(&g).await.unwrap();
        store.save_finished_game(&g).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(store.games_directory())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["g1.json".to_string()]);
    }

    #[tokio::test]
    async fn test_partial_write_does_not_block_save() {
        let (store, _temp) = create_test_store();
        // 上次写入中断留下的半截临时文件
        std::fs::write(store.games_directory().join("g1.0123abcd.tmp"), "{\"id\":").unwrap();

        store
            .save_finished_game(&game("g1", "alice", "bob", "alice"))
            .await
            .unwrap();

        let rows = store.leaderboard(10).await.unwrap();
        assert_eq!(rows, vec![LeaderboardRow { username: "alice".to_string(), wins: 1 }]);
    }

    #[tokio::test]
    async fn test_failed_save_can_be_retried() {
        let (store, _temp) = create_test_store();
        let g = game("g1", "alice", "bob", "alice");
        std::fs::remove_dir(store.games_directory()).unwrap();

        assert!(store.save_finished_game(&g).await.is_err());

        std::fs::create_dir_all(store.games_directory()).unwrap();
        store.save_finished_game(&g).await.unwrap();
        assert_eq!(store.leaderboard(10).await.unwrap().len(), 1);
        assert_eq!(std::fs::read_dir(store.games_directory()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_json_store_skips_corrupt_files() {
        let (store, _temp) = create_test_store();
        store
            .save_finished_game(&game("g1", "alice", "bob", "alice"))
            .await
            .unwrap();
        std::fs::write(store.games_directory().join("broken.json"), "{not json").unwrap();
        std::fs::write(store.games_directory().join("notes.txt"), "hello").unwrap();

        let rows = store.leaderboard(10).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_hostile_id_stays_in_directory() {
        let (store, temp) = create_test_store();
        store
            .save_finished_game(&game("../../escape", "alice", "bob", "alice"))
            .await
            .unwrap();

        assert!(!temp.path().join("escape.json").exists());
        assert_eq!(std::fs::read_dir(store.games_directory()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        for g in sample_games() {
            store.save_finished_game(&g).await.unwrap();
        }
        store
            .save_finished_game(&game("g1", "alice", "bob", "alice"))
            .await
            .unwrap();

        assert_eq!(store.len(), 5);
        assert_eq!(store.get("g1").unwrap().winner, "bob");
        assert_eq!(store.leaderboard(10).await.unwrap()[0].username, "bob");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("abc-123"), "abc-123");
        assert_eq!(sanitize_filename("a/b:c"), "a_b_c");
        assert_eq!(sanitize_filename("../x"), "___x");
    }
}
