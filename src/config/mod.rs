// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

use crate::uploader::MIN_S3_PART_SIZE;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 检查点配置
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// S3 客户端配置
    #[serde(default)]
    pub s3: S3Config,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 目标 bucket
    #[serde(default)]
    pub bucket: String,
    /// 源目录
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// 分片大小（MB，默认 100）
    #[serde(default = "default_part_size_mb")]
    pub part_size_mb: u64,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_part_size_mb() -> u64 {
    100
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            source_dir: default_source_dir(),
            part_size_mb: default_part_size_mb(),
        }
    }
}

impl UploadConfig {
    /// 分片大小（字节）
    pub fn part_size_bytes(&self) -> u64 {
        self.part_size_mb.saturating_mul(1024 * 1024)
    }
}

/// 检查点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// 检查点目录
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
    /// 上传完成后删除检查点
    #[serde(default = "default_remove_on_complete")]
    pub remove_on_complete: bool,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".checkpoints")
}

fn default_remove_on_complete() -> bool {
    true
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
            remove_on_complete: default_remove_on_complete(),
        }
    }
}

/// S3 客户端配置
///
/// 未设置的项使用 AWS 默认配置链（环境变量、profile 等）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub region: Option<String>,
    /// 兼容 S3 的自建存储地址
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 加载配置，文件不存在时返回 `None`
    ///
    /// 文件存在但无法解析时返回错误。
    /// 此时日志系统尚未初始化，不在这里输出日志
    pub async fn load_if_exists(path: &str) -> Result<Option<Self>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }
        Self::load_from_file(path).await.map(Some)
    }

    /// 检查合并命令行参数后的配置
    pub fn validate(&self) -> Result<()> {
        if self.upload.bucket.trim().is_empty() {
            anyhow::bail!("未指定 bucket（--bucket 或配置项 upload.bucket）");
        }

        let dir = &self.upload.source_dir;
        if !dir.exists() {
            anyhow::bail!("源目录不存在: {}", dir.display());
        }
        if !dir.is_dir() {
            anyhow::bail!("源路径不是文件夹: {}", dir.display());
        }

        if self.upload.part_size_mb == 0 {
            anyhow::bail!("分片大小必须大于 0");
        }
        if self.upload.part_size_bytes() < MIN_S3_PART_SIZE {
            tracing::warn!(
                "分片大小 {}MB 小于 S3 要求的最小值 5MB，多分片文件的合并可能失败",
                self.upload.part_size_mb
            );
        }

        Ok(())
    }
}
