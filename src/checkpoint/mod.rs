//! 断点记录模块
//!
//! 每个源文件对应一个检查点文件，记录分片上传会话 ID 和已完成的分片，
//! 进程中断后可从最后一个已持久化分片的字节偏移继续上传。
//!
//! ## 文件结构
//!
//! ```text
//! .checkpoints/
//! └── {sha256(源文件路径)}    # 文本格式，见 record 模块
//! ```
//!
//! ## 持久化边界
//!
//! 分片只有在 `Checkpoint::save` 返回 `Ok` 之后才计入续传进度：
//! 追加一行并 fsync 后才返回。
//!
//! ## 前置条件
//!
//! 同一源文件在同一时刻只允许一个上传任务持有检查点（不加锁，由调度方保证）。
//! 两个任务并发追加会交错写入，破坏记录。

pub mod record;
pub mod store;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteError;

pub use record::{parse_checkpoint, CheckpointRecord, CompletedPart, ParsedCheckpoint};
pub use store::{Checkpoint, CheckpointStore, CompletionOutcome, UploadSession};

/// 检查点错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// 本地 I/O 错误（打开/读取/写入/同步）
    #[error("检查点 I/O 失败 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 检查点目录路径被普通文件占用
    #[error("检查点路径不是目录: {0:?}")]
    NotADirectory(PathBuf),

    /// 记录内容损坏，续传偏移不可信
    #[error("检查点已损坏 {path:?} (行 {line}): {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// 分片未按顺序追加
    #[error("分片顺序错误: 期望 #{expected}, 实际 #{actual}")]
    OutOfOrder { expected: i32, actual: i32 },

    /// 远端调用失败（创建会话 / 合并）
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }
}
