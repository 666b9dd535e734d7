//! 源目录扫描
//!
//! 只扫描一层：普通文件进入上传列表，子目录和其它条目跳过。
//! 结果按文件名排序，保证日志顺序稳定。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 文件扫描结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// 本地文件路径（源目录路径 + 文件名）
    pub local_path: PathBuf,
    /// 文件大小（字节）
    pub size: u64,
}

/// 扫描源目录（不递归）
pub fn scan_source_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<ScannedFile>> {
    let dir = dir.as_ref();

    if !dir.exists() {
        anyhow::bail!("源目录不存在: {}", dir.display());
    }
    if !dir.is_dir() {
        anyhow::bail!("源路径不是文件夹: {}", dir.display());
    }

    let entries =
        std::fs::read_dir(dir).with_context(|| format!("无法读取目录: {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("读取目录项失败: {}", dir.display()))?;
        let path = entry.path();

        // 跟随符号链接，指向普通文件的链接也会上传
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                debug!("跳过无法访问的条目: {} ({})", path.display(), e);
                continue;
            }
        };

        if !metadata.is_file() {
            debug!("跳过非普通文件: {}", path.display());
            continue;
        }

        files.push(ScannedFile {
            local_path: path,
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.local_path.file_name().cmp(&b.local_path.file_name()));

    let total: u64 = files.iter().map(|f| f.size).sum();
    info!(
        "扫描完成: {} 个文件, 共 {}",
        files.len(),
        format_bytes(total)
    );

    Ok(files)
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
