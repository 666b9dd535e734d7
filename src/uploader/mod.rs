// 上传引擎模块
//
// - part:    从续传偏移开始按固定大小读取分片
// - engine:  单文件上传驱动（恢复 → 逐片上传并记录 → 合并）
// - folder:  扫描源目录（不递归）
// - manager: 每个文件一个并发任务，汇总结果

pub mod engine;
pub mod folder;
pub mod manager;
pub mod part;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::remote::RemoteError;

pub use engine::{FileReport, UploadEngine};
pub use folder::{scan_source_dir, ScannedFile};
pub use manager::{FileFailure, RunSummary, UploadManager};
pub use part::PartReader;

/// 默认分片大小: 100MB
pub const DEFAULT_PART_SIZE: u64 = 100 * 1024 * 1024;

/// S3 要求除最后一片外每片至少 5MB
pub const MIN_S3_PART_SIZE: u64 = 5 * 1024 * 1024;

/// S3 单次分片上传最多 10000 片
pub const MAX_PART_COUNT: i32 = 10_000;

/// 单文件上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 源文件打开/定位/读取失败
    #[error("读取源文件失败 {path:?}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 检查点错误（含会话创建与合并失败）
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// 分片上传失败（不重试，直接中止该文件）
    #[error("上传分片 #{part_number} 失败: {source}")]
    Part {
        part_number: i32,
        #[source]
        source: RemoteError,
    },

    /// 分片数超过上限
    #[error("分片数超过上限 {MAX_PART_COUNT}，请增大分片大小")]
    TooManyParts,
}

impl UploadError {
    pub(crate) fn source_io(path: &Path, source: io::Error) -> Self {
        UploadError::Source {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// 由源文件路径得到对象 key
///
/// 统一使用 `/` 分隔，按字面规范化 `.` 和 `..`，并去掉开头的 `/`
pub fn object_key_for(source: &Path) -> String {
    let raw = source.to_string_lossy().replace('\\', "/");
    let absolute = raw.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                // 根目录之上没有父目录
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    segments.join("/")
}
