//! 检查点存储
//!
//! 负责检查点文件的定位、创建、解析、追加和完成后的清理

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::record::{parse_checkpoint, CompletedPart, ParsedCheckpoint};
use super::CheckpointError;
use crate::remote::{MultipartApi, PartRef};

/// 一个进行中的分片上传会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// 远端会话 ID，创建后不再变化
    pub session_id: String,
    pub bucket: String,
    pub key: String,
    /// 已完成分片，按序号严格递增
    pub parts: Vec<CompletedPart>,
}

/// 合并结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// 本次合并成功
    Completed,
    /// 远端会话已不存在（之前已合并或已过期），视为完成
    AlreadyFinalized,
}

/// 检查点目录
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 检查点文件路径：`{dir}/{hex(sha256(源文件路径))}`
    ///
    /// 256 位哈希下不处理碰撞
    pub fn checkpoint_path(&self, source: &Path) -> PathBuf {
        let digest = Sha256::digest(source.as_os_str().as_encoded_bytes());
        self.dir.join(hex::encode(digest))
    }

    /// 确保检查点目录存在
    pub async fn ensure_dir(&self) -> Result<(), CheckpointError> {
        match fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(CheckpointError::NotADirectory(self.dir.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&self.dir)
                    .await
                    .map_err(|e| CheckpointError::io(&self.dir, e))?;
                debug!("已创建检查点目录: {:?}", self.dir);
                Ok(())
            }
            Err(e) => Err(CheckpointError::io(&self.dir, e)),
        }
    }

    /// 打开或创建检查点
    ///
    /// - 文件不存在或为空：调用远端创建会话，立即写入并同步会话行
    /// - 文件已有内容：解析会话 ID 和已完成分片
    pub async fn open(
        &self,
        api: &dyn MultipartApi,
        bucket: &str,
        key: &str,
        source: &Path,
    ) -> Result<Checkpoint, CheckpointError> {
        self.ensure_dir().await?;

        let path = self.checkpoint_path(source);
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(|e| CheckpointError::io(&path, e))?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .await
            .map_err(|e| CheckpointError::io(&path, e))?;
        let content = String::from_utf8(raw).map_err(|_| CheckpointError::Corrupt {
            path: path.clone(),
            line: 0,
            reason: "非 UTF-8 内容".to_string(),
        })?;

        let parsed = parse_checkpoint(&content).map_err(|c| CheckpointError::Corrupt {
            path: path.clone(),
            line: c.line,
            reason: c.reason,
        })?;

        let checkpoint = match parsed {
            ParsedCheckpoint::Empty { torn } => {
                if torn {
                    warn!("检查点会话行未写完，重新创建会话: {:?}", path);
                    truncate(&file, &path, 0).await?;
                }

                let session_id = api.create_session(bucket, key).await?;
                let mut checkpoint = Checkpoint {
                    path,
                    file,
                    session: UploadSession {
                        session_id,
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        parts: Vec::new(),
                    },
                    resumed_parts: 0,
                };
                let line = format!("{}\n", checkpoint.session.session_id);
                checkpoint.append_durable(&line).await?;
                info!(
                    "已创建分片上传会话: key={}, session={}",
                    key, checkpoint.session.session_id
                );
                checkpoint
            }
            ParsedCheckpoint::Session {
                record,
                durable_len,
                dropped_tail,
            } => {
                if let Some(tail) = dropped_tail {
                    warn!("丢弃未写完的检查点尾行 {:?}: {:?}", path, tail);
                    truncate(&file, &path, durable_len).await?;
                }

                let resumed_parts = record.parts.len();
                info!(
                    "从检查点恢复: key={}, session={}, 已完成分片={}, 偏移={}",
                    key,
                    record.session_id,
                    resumed_parts,
                    record.resume_offset()
                );
                Checkpoint {
                    path,
                    file,
                    session: UploadSession {
                        session_id: record.session_id,
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        parts: record.parts,
                    },
                    resumed_parts,
                }
            }
        };

        Ok(checkpoint)
    }
}

async fn truncate(file: &File, path: &Path, len: u64) -> Result<(), CheckpointError> {
    file.set_len(len)
        .await
        .map_err(|e| CheckpointError::io(path, e))?;
    file.sync_all()
        .await
        .map_err(|e| CheckpointError::io(path, e))
}

/// 单个文件的检查点句柄
///
/// 由处理该文件的上传任务独占
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    file: File,
    session: UploadSession,
    resumed_parts: usize,
}

impl Checkpoint {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    /// 已完成分片（含本次运行前恢复的分片）
    pub fn parts(&self) -> &[CompletedPart] {
        &self.session.parts
    }

    /// 打开时从检查点恢复的分片数
    pub fn resumed_parts(&self) -> usize {
        self.resumed_parts
    }

    /// 下一个分片序号
    pub fn next_part_number(&self) -> i32 {
        self.session.parts.len() as i32 + 1
    }

    /// 续传偏移：已记录分片大小之和
    pub fn resume_offset(&self) -> u64 {
        self.session.parts.iter().map(|p| p.size).sum()
    }

    /// 按序提交用的分片列表
    pub fn part_refs(&self) -> Vec<PartRef> {
        self.session.parts.iter().map(|p| p.to_part_ref()).collect()
    }

    // append 模式打开，写入总在文件末尾
    async fn append_durable(&mut self, line: &str) -> Result<(), CheckpointError> {
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))
    }

    /// 记录一个已上传的分片
    ///
    /// 追加并 fsync 后才返回；返回 `Ok` 之前该分片不计入续传进度。
    /// 分片序号必须是当前已记录数 + 1
    pub async fn save(&mut self, part: CompletedPart) -> Result<(), CheckpointError> {
        let expected = self.next_part_number();
        if part.part_number != expected {
            return Err(CheckpointError::OutOfOrder {
                expected,
                actual: part.part_number,
            });
        }

        self.append_durable(&part.to_line()).await?;
        debug!(
            "已记录分片: key={}, part=#{}, size={}",
            self.session.key, part.part_number, part.size
        );
        self.session.parts.push(part);
        Ok(())
    }

    /// 以全部已记录分片（按序）合并会话
    ///
    /// 远端返回会话不存在时视为已完成（只记录警告）。
    /// 进入终态后，`remove_record` 为 true 则删除检查点文件，
    /// 避免之后对修改过的文件复用已完成的会话
    pub async fn complete(
        self,
        api: &dyn MultipartApi,
        remove_record: bool,
    ) -> Result<CompletionOutcome, CheckpointError> {
        let parts = self.part_refs();
        let session = &self.session;

        let outcome = match api
            .complete_session(&session.bucket, &session.key, &session.session_id, &parts)
            .await
        {
            Ok(()) => {
                info!(
                    "上传完成: s3://{}/{} ({} 个分片)",
                    session.bucket,
                    session.key,
                    parts.len()
                );
                CompletionOutcome::Completed
            }
            Err(e) if e.is_session_not_found() => {
                warn!(
                    "合并时会话已不存在，视为已完成: key={}, session={}",
                    session.key, session.session_id
                );
                CompletionOutcome::AlreadyFinalized
            }
            Err(e) => return Err(e.into()),
        };

        let Checkpoint { path, file, .. } = self;
        drop(file);
        if remove_record {
            match fs::remove_file(&path).await {
                Ok(()) => debug!("已删除检查点: {:?}", path),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CheckpointError::io(&path, e)),
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryMultipartApi;
    use tempfile::TempDir;

    const BUCKET: &str = "bucket";
    const KEY: &str = "data/file.bin";

    fn setup() -> (TempDir, CheckpointStore, MemoryMultipartApi) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = CheckpointStore::new(temp_dir.path().join(".checkpoints"));
        (temp_dir, store, MemoryMultipartApi::new())
    }

    fn source() -> PathBuf {
        PathBuf::from("/data/file.bin")
    }

    #[test]
    fn test_checkpoint_path_is_sha256_hex() {
        let store = CheckpointStore::new("/tmp/cp");
        let path = store.checkpoint_path(Path::new("/data/file.bin"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(path.parent().unwrap(), Path::new("/tmp/cp"));

        // 同一路径结果稳定，不同路径结果不同
        assert_eq!(path, store.checkpoint_path(Path::new("/data/file.bin")));
        assert_ne!(path, store.checkpoint_path(Path::new("/data/other.bin")));
    }

    #[cfg(unix)]
    #[test]
    fn test_checkpoint_path_distinguishes_non_utf8_paths() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let store = CheckpointStore::new("/tmp/cp");
        let a = Path::new(OsStr::from_bytes(b"/data/\xff.bin"));
        let b = Path::new(OsStr::from_bytes(b"/data/\xfe.bin"));
        assert_eq!(a.to_string_lossy(), b.to_string_lossy());
        assert_ne!(store.checkpoint_path(a), store.checkpoint_path(b));
    }

    #[tokio::test]
    async fn test_open_creates_session_and_dir() {
        let (_tmp, store, api) = setup();
        assert!(!store.dir().exists());

        let cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
        assert!(store.dir().is_dir());
        assert_eq!(api.create_calls(), 1);
        assert!(cp.parts().is_empty());
        assert_eq!(cp.resume_offset(), 0);
        assert_eq!(cp.next_part_number(), 1);

        let content = std::fs::read_to_string(cp.path()).unwrap();
        assert_eq!(content, format!("{}\n", cp.session_id()));
    }

    #[tokio::test]
    async fn test_open_rejects_file_as_dir() {
        let (tmp, _, api) = setup();
        let occupied = tmp.path().join("occupied");
        std::fs::write(&occupied, b"x").unwrap();
        let store = CheckpointStore::new(&occupied);

        let err = store.open(&api, BUCKET, KEY, &source()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotADirectory(_)));
        assert_eq!(api.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_save_appends_and_reopen_resumes() {
        let (_tmp, store, api) = setup();

        let session_id = {
            let mut cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
            cp.save(CompletedPart::new("\"e1\"", 1, 100)).await.unwrap();
            cp.save(CompletedPart::new("\"e2\"", 2, 100)).await.unwrap();
            cp.session_id().to_string()
        };

        let cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
        assert_eq!(api.create_calls(), 1);
        assert_eq!(cp.session_id(), session_id);
        assert_eq!(cp.resumed_parts(), 2);
        assert_eq!(cp.resume_offset(), 200);
        assert_eq!(cp.next_part_number(), 3);

        let content = std::fs::read_to_string(cp.path()).unwrap();
        assert_eq!(
            content,
            format!("{}\n\"e1\",1,100\n\"e2\",2,100\n", session_id)
        );
    }

    #[tokio::test]
    async fn test_save_rejects_out_of_order() {
        let (_tmp, store, api) = setup();
        let mut cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();

        let err = cp.save(CompletedPart::new("\"e2\"", 2, 10)).await.unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::OutOfOrder {
                expected: 1,
                actual: 2
            }
        ));
        assert!(cp.parts().is_empty());

        let content = std::fs::read_to_string(cp.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_empty_file_creates_new_session() {
        let (_tmp, store, api) = setup();
        store.ensure_dir().await.unwrap();
        std::fs::write(store.checkpoint_path(&source()), b"").unwrap();

        let cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
        assert_eq!(api.create_calls(), 1);
        assert!(!cp.session_id().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_fails_fast() {
        let (_tmp, store, api) = setup();
        store.ensure_dir().await.unwrap();
        let path = store.checkpoint_path(&source());
        std::fs::write(&path, b"upload-1\n\"e1\",1,abc\n").unwrap();

        let err = store.open(&api, BUCKET, KEY, &source()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { line: 2, .. }));
        assert_eq!(api.create_calls(), 0);

        // 损坏的记录保持原样
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "upload-1\n\"e1\",1,abc\n"
        );
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let (_tmp, store, api) = setup();
        store.ensure_dir().await.unwrap();
        let path = store.checkpoint_path(&source());
        std::fs::write(&path, b"upload-1\n\"e1\",1,100\n\"e2\",2,10").unwrap();

        let mut cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
        assert_eq!(cp.session_id(), "upload-1");
        assert_eq!(cp.resume_offset(), 100);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "upload-1\n\"e1\",1,100\n"
        );

        cp.save(CompletedPart::new("\"e2\"", 2, 100)).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "upload-1\n\"e1\",1,100\n\"e2\",2,100\n"
        );
    }

    #[tokio::test]
    async fn test_blank_torn_tail_is_truncated() {
        let (_tmp, store, api) = setup();
        store.ensure_dir().await.unwrap();
        let path = store.checkpoint_path(&source());
        std::fs::write(&path, b"upload-1\n\"e1\",1,100\n  ").unwrap();

        let mut cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
        cp.save(CompletedPart::new("\"e2\"", 2, 100)).await.unwrap();
        drop(cp);

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "upload-1\n\"e1\",1,100\n\"e2\",2,100\n"
        );
        let cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
        assert_eq!(cp.resumed_parts(), 2);
    }

    #[tokio::test]
    async fn test_create_session_error_is_fatal() {
        let (_tmp, store, api) = setup();
        api.fail_create_for(KEY);

        let err = store.open(&api, BUCKET, KEY, &source()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Remote(_)));
    }

    #[tokio::test]
    async fn test_complete_removes_record() {
        let (_tmp, store, api) = setup();
        let mut cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
        let etag = api
            .upload_part(BUCKET, KEY, cp.session_id(), 1, b"hello".to_vec())
            .await
            .unwrap();
        cp.save(CompletedPart::new(etag, 1, 5)).await.unwrap();
        let path = cp.path().to_path_buf();

        let outcome = cp.complete(&api, true).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::Completed);
        assert!(!path.exists());
        assert_eq!(api.object(BUCKET, KEY).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_complete_session_not_found_is_benign() {
        let (_tmp, store, api) = setup();

        // 第一次：合并成功但保留记录
        let cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
        let path = cp.path().to_path_buf();
        assert_eq!(
            cp.complete(&api, false).await.unwrap(),
            CompletionOutcome::Completed
        );
        assert!(path.exists());

        // 第二次：会话已不存在
        let cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
        assert_eq!(
            cp.complete(&api, true).await.unwrap(),
            CompletionOutcome::AlreadyFinalized
        );
        assert!(!path.exists());
        assert_eq!(api.complete_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_complete_other_error_keeps_record() {
        let (_tmp, store, api) = setup();
        api.fail_complete_for(KEY);
        let cp = store.open(&api, BUCKET, KEY, &source()).await.unwrap();
        let path = cp.path().to_path_buf();

        let err = cp.complete(&api, true).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Remote(_)));
        assert!(path.exists());
    }
}
