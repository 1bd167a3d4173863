//! File-based board store.
//!
//! Each board gets a directory holding `checkpoint.json` and an append-only
//! `log.jsonl` with one committed mutation per line.

use super::{BoardStore, BoxFuture, Checkpoint, LoadedBoard, StoreError, StoreResult};
use crate::mutation::{BoardId, Mutation};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const CHECKPOINT_FILE: &str = "checkpoint.json";
const LOG_FILE: &str = "log.jsonl";

/// File-based store rooted at a base directory.
pub struct FileBoardStore {
    base_path: PathBuf,
}

impl FileBoardStore {
    /// Create a store at `base_path`, creating the directory if needed.
    pub fn new(base_path: PathBuf) -> StoreResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                StoreError::Io(format!("Failed to create storage directory: {}", e))
            })?;
        }
        Ok(Self { base_path })
    }

    /// Create the store in the default location.
    ///
    /// On Unix: `~/.local/share/inkboard/boards/`
    /// On Windows: `%LOCALAPPDATA%\inkboard\boards\`
    pub fn default_location() -> StoreResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StoreError::Io("Could not determine home directory".to_string()))?;
        Self::new(base.join("inkboard").join("boards"))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn board_dir(&self, board: &BoardId) -> StoreResult<PathBuf> {
        if !board.is_valid() {
            return Err(StoreError::Other(format!("Invalid board id: {:?}", board.as_str())));
        }
        Ok(self.base_path.join(board.as_str()))
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io(format!("Failed to {} {}: {}", action, path.display(), e))
}

/// Write through a temporary file so a crash never leaves a torn checkpoint.
fn write_atomic(path: &Path, contents: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).map_err(|e| io_error("write", &tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error("rename", &tmp, e))
}

fn read_log(path: &Path) -> StoreResult<Vec<Mutation>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path).map_err(|e| io_error("read", path, e))?;
    let mut log = Vec::new();
    let mut lines = text.lines().filter(|l| !l.trim().is_empty()).peekable();
    while let Some(line) = lines.next() {
        match serde_json::from_str::<Mutation>(line) {
            Ok(mutation) => log.push(mutation),
            // A torn final line means the write never completed, so the
            // mutation was never acknowledged.
            Err(e) if lines.peek().is_none() => {
                log::warn!("Ignoring torn log tail in {}: {}", path.display(), e);
            }
            Err(e) => {
                return Err(StoreError::Serialization(format!(
                    "Failed to parse {}: {}",
                    path.display(),
                    e
                )));
            }
        }
    }
    Ok(log)
}

/// Append one log line. On failure the file is cut back to its previous
/// length, so a refused commit never lingers in the log.
fn append_line(path: &Path, line: &[u8]) -> StoreResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_error("open", path, e))?;
    let len = file
        .metadata()
        .map_err(|e| io_error("stat", path, e))?
        .len();
    match file.write_all(line).and_then(|_| file.sync_data()) {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Err(truncate) = file.set_len(len).and_then(|_| file.sync_data()) {
                log::error!("Failed to roll back {}: {}", path.display(), truncate);
            }
            Err(io_error("append to", path, e))
        }
    }
}

fn write_log(path: &Path, log: &[Mutation]) -> StoreResult<()> {
    let mut out = String::new();
    for mutation in log {
        let line = serde_json::to_string(mutation)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        out.push_str(&line);
        out.push('\n');
    }
    write_atomic(path, out.as_bytes())
}

impl BoardStore for FileBoardStore {
    fn load_document(&self, board: &BoardId) -> BoxFuture<'_, StoreResult<LoadedBoard>> {
        let dir = self.board_dir(board);
        Box::pin(async move {
            let dir = dir?;
            let checkpoint_path = dir.join(CHECKPOINT_FILE);
            let checkpoint = if checkpoint_path.exists() {
                let json = fs::read_to_string(&checkpoint_path)
                    .map_err(|e| io_error("read", &checkpoint_path, e))?;
                let checkpoint: Checkpoint = serde_json::from_str(&json).map_err(|e| {
                    StoreError::Serialization(format!(
                        "Failed to parse {}: {}",
                        checkpoint_path.display(),
                        e
                    ))
                })?;
                Some(checkpoint)
            } else {
                None
            };

            let covered = checkpoint.as_ref().map_or(0, |c| c.sequence);
            let mut log = read_log(&dir.join(LOG_FILE))?;
            log.retain(|m| m.global_seq.is_some_and(|seq| seq > covered));
            Ok(LoadedBoard { checkpoint, log })
        })
    }

    fn persist_mutation(
        &self,
        board: &BoardId,
        mutation: &Mutation,
        sequence: u64,
    ) -> BoxFuture<'_, StoreResult<()>> {
        let dir = self.board_dir(board);
        let mut mutation = mutation.clone();
        mutation.global_seq = Some(sequence);
        Box::pin(async move {
            let dir = dir?;
            fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;
            let mut line = serde_json::to_string(&mutation)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            line.push('\n');

            append_line(&dir.join(LOG_FILE), line.as_bytes())
        })
    }

    fn save_checkpoint(
        &self,
        board: &BoardId,
        checkpoint: &Checkpoint,
    ) -> BoxFuture<'_, StoreResult<()>> {
        let dir = self.board_dir(board);
        let json = serde_json::to_vec_pretty(checkpoint);
        let sequence = checkpoint.sequence;
        Box::pin(async move {
            let dir = dir?;
            let json = json.map_err(|e| StoreError::Serialization(e.to_string()))?;
            fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;
            write_atomic(&dir.join(CHECKPOINT_FILE), &json)?;

            let log_path = dir.join(LOG_FILE);
            let mut log = read_log(&log_path)?;
            log.retain(|m| m.global_seq.is_some_and(|seq| seq > sequence));
            write_log(&log_path, &log)?;
            log::debug!("Checkpointed {} at sequence {}", dir.display(), sequence);
            Ok(())
        })
    }

    fn delete(&self, board: &BoardId) -> BoxFuture<'_, StoreResult<()>> {
        let dir = self.board_dir(board);
        let id = board.to_string();
        Box::pin(async move {
            let dir = dir?;
            if !dir.exists() {
                return Err(StoreError::NotFound(id));
            }
            fs::remove_dir_all(&dir).map_err(|e| io_error("delete", &dir, e))
        })
    }

    fn list(&self) -> BoxFuture<'_, StoreResult<Vec<BoardId>>> {
        let base = self.base_path.clone();
        Box::pin(async move {
            if !base.exists() {
                return Ok(vec![]);
            }
            let entries = fs::read_dir(&base)
                .map_err(|e| StoreError::Io(format!("Failed to read directory: {}", e)))?;

            let mut ids: Vec<BoardId> = entries
                .flatten()
                .filter(|entry| entry.path().is_dir())
                .filter_map(|entry| entry.file_name().to_str().map(BoardId::from))
                .filter(BoardId::is_valid)
                .collect();
            ids.sort();
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::BoardDocument;
    use crate::mutation::{Op, SessionId};
    use crate::shapes::{Layer, Rectangle};
    use crate::store::block_on;
    use kurbo::Point;
    use tempfile::tempdir;

    fn insert(seq: u64) -> Mutation {
        let layer: Layer = Rectangle::new(Point::new(seq as f64, 0.0), 1.0, 1.0).into();
        Mutation::new(SessionId::new(), seq, Op::insert(layer, 0))
    }

    #[test]
    fn test_file_store_log_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileBoardStore::new(dir.path().to_path_buf()).unwrap();
        let board = BoardId::new("board-1");

        let first = insert(1);
        block_on(store.persist_mutation(&board, &first, 1)).unwrap();
        block_on(store.persist_mutation(&board, &insert(2), 2)).unwrap();

        let loaded = block_on(store.load_document(&board)).unwrap();
        assert!(loaded.checkpoint.is_none());
        assert_eq!(loaded.log.len(), 2);
        assert_eq!(loaded.log[0].op, first.op);
        assert_eq!(loaded.last_sequence(), 2);
    }

    #[test]
    fn test_checkpoint_compacts_log() {
        let dir = tempdir().unwrap();
        let store = FileBoardStore::new(dir.path().to_path_buf()).unwrap();
        let board = BoardId::new("compact");

        let mut doc = BoardDocument::new();
        for seq in 1..=3 {
            let mutation = insert(seq);
            doc.apply(&mutation.op).unwrap();
            block_on(store.persist_mutation(&board, &mutation, seq)).unwrap();
        }
        let checkpoint = Checkpoint {
            snapshot: doc.snapshot(),
            sequence: 3,
            ..Checkpoint::default()
        };
        block_on(store.save_checkpoint(&board, &checkpoint)).unwrap();
        block_on(store.persist_mutation(&board, &insert(4), 4)).unwrap();

        let loaded = block_on(store.load_document(&board)).unwrap();
        assert_eq!(loaded.checkpoint, Some(checkpoint));
        assert_eq!(loaded.log.len(), 1);
        assert_eq!(loaded.last_sequence(), 4);
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = tempdir().unwrap();
        let store = FileBoardStore::new(dir.path().to_path_buf()).unwrap();
        let board = BoardId::new("torn");
        block_on(store.persist_mutation(&board, &insert(1), 1)).unwrap();

        let log_path = dir.path().join("torn").join(LOG_FILE);
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(b"{\"session\":").unwrap();

        let loaded = block_on(store.load_document(&board)).unwrap();
        assert_eq!(loaded.log.len(), 1);
    }

    #[test]
    fn test_invalid_board_id_is_refused() {
        let dir = tempdir().unwrap();
        let store = FileBoardStore::new(dir.path().to_path_buf()).unwrap();
        let result = block_on(store.load_document(&BoardId::new("../escape")));
        assert!(matches!(result, Err(StoreError::Other(_))));
    }

    #[test]
    fn test_list_and_delete() {
        let dir = tempdir().unwrap();
        let store = FileBoardStore::new(dir.path().to_path_buf()).unwrap();
        for name in ["b", "a"] {
            block_on(store.persist_mutation(&BoardId::new(name), &insert(1), 1)).unwrap();
        }
        assert_eq!(
            block_on(store.list()).unwrap(),
            vec![BoardId::new("a"), BoardId::new("b")]
        );
        block_on(store.delete(&BoardId::new("a"))).unwrap();
        assert_eq!(block_on(store.list()).unwrap(), vec![BoardId::new("b")]);
    }
}
