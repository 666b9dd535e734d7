// 上传管理器
//
// 扫描源目录，为每个文件启动一个独立任务（不限并发数），等待全部结束后汇总：
// - 任一文件失败（包括任务 panic）不影响其它文件
// - 同一文件只会被启动一次，检查点不需要跨任务加锁

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::future::join_all;
use tracing::{error, info, warn};

use super::engine::{FileReport, UploadEngine};
use super::folder::{format_bytes, scan_source_dir};
use crate::checkpoint::CompletionOutcome;

/// 失败的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// 一次运行的汇总结果
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// 扫描到的文件数
    pub total: usize,
    pub succeeded: Vec<FileReport>,
    pub failed: Vec<FileFailure>,
    /// 总耗时
    pub elapsed: Duration,
}

impl RunSummary {
    /// 所有文件都已上传完成
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.succeeded.iter().map(|r| r.uploaded_bytes).sum()
    }

    /// 输出汇总日志
    pub fn log_summary(&self) {
        for report in &self.succeeded {
            match report.outcome {
                CompletionOutcome::Completed => info!(
                    "✓ {} → {} (分片 {}, 续传 {}, 本次上传 {})",
                    report.source.display(),
                    report.key,
                    report.total_parts,
                    report.resumed_parts,
                    format_bytes(report.uploaded_bytes)
                ),
                CompletionOutcome::AlreadyFinalized => info!(
                    "✓ {} → {} (此前已完成)",
                    report.source.display(),
                    report.key
                ),
            }
        }
        for failure in &self.failed {
            error!("✗ {}: {}", failure.path.display(), failure.reason);
        }

        let elapsed = self.elapsed.as_secs_f64();
        if self.is_success() {
            info!(
                "全部完成: {} 个文件, 本次上传 {}, 耗时 {:.2}s",
                self.total,
                format_bytes(self.uploaded_bytes()),
                elapsed
            );
        } else {
            warn!(
                "部分失败: 成功 {}, 失败 {}, 共 {} 个文件, 耗时 {:.2}s",
                self.succeeded.len(),
                self.failed.len(),
                self.total,
                elapsed
            );
        }
    }
}

/// 上传管理器
pub struct UploadManager {
    engine: UploadEngine,
}

impl UploadManager {
    pub fn new(engine: UploadEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &UploadEngine {
        &self.engine
    }

    /// 上传源目录下的所有文件
    ///
    /// 只有目录本身无法扫描时返回错误；单个文件的失败记入汇总
    pub async fn run(&self, dir: &Path) -> Result<RunSummary> {
        let start = Instant::now();
        let files = scan_source_dir(dir)?;

        info!(
            "开始上传 {} 个文件到 bucket {} (分片大小 {})",
            files.len(),
            self.engine.bucket(),
            format_bytes(self.engine.part_size())
        );

        let handles: Vec<_> = files
            .into_iter()
            .map(|file| {
                let engine = self.engine.clone();
                let path = file.local_path;
                let task_path = path.clone();
                let handle =
                    tokio::spawn(async move { engine.upload_file(&task_path).await });
                (path, handle)
            })
            .collect();

        let total = handles.len();
        let (paths, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        let mut summary = RunSummary {
            total,
            ..Default::default()
        };

        for (path, result) in paths.into_iter().zip(results) {
            match result {
                Ok(Ok(report)) => summary.succeeded.push(report),
                Ok(Err(e)) => {
                    error!("文件上传失败: {}: {}", path.display(), e);
                    summary.failed.push(FileFailure {
                        path,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    error!("上传任务异常退出: {}: {}", path.display(), e);
                    summary.failed.push(FileFailure {
                        path,
                        reason: format!("任务异常退出: {}", e),
                    });
                }
            }
        }

        summary.elapsed = start.elapsed();
        Ok(summary)
    }
}
