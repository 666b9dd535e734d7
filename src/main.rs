use anyhow::{Context, Result};
use clap::Parser;
use s3_multipart_upload::{
    checkpoint::CheckpointStore, config::AppConfig, logging, S3MultipartApi, UploadEngine,
    UploadManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// 把目录下的文件以可续传的分片方式上传到 S3
#[derive(Debug, Parser)]
#[command(name = "s3-multipart-upload", version, about)]
struct Cli {
    /// 目标 bucket
    #[arg(long)]
    bucket: Option<String>,

    /// 源目录（只上传第一层的普通文件）
    #[arg(long)]
    dir: Option<PathBuf>,

    /// 检查点目录
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// AWS 区域
    #[arg(long)]
    region: Option<String>,

    /// 配置文件路径（不存在时使用默认配置）
    #[arg(long, default_value = "config/app.toml")]
    config: String,

    /// 分片大小（MB）
    #[arg(long)]
    part_size_mb: Option<u64>,

    /// 兼容 S3 的自建存储地址
    #[arg(long)]
    endpoint_url: Option<String>,

    /// 上传完成后保留检查点
    #[arg(long)]
    keep_checkpoints: bool,
}

impl Cli {
    /// 命令行参数覆盖配置文件
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(bucket) = &self.bucket {
            config.upload.bucket = bucket.clone();
        }
        if let Some(dir) = &self.dir {
            config.upload.source_dir = dir.clone();
        }
        if let Some(part_size_mb) = self.part_size_mb {
            config.upload.part_size_mb = part_size_mb;
        }
        if let Some(checkpoint) = &self.checkpoint {
            config.checkpoint.dir = checkpoint.clone();
        }
        if self.keep_checkpoints {
            config.checkpoint.remove_on_complete = false;
        }
        if let Some(region) = &self.region {
            config.s3.region = Some(region.clone());
        }
        if let Some(endpoint_url) = &self.endpoint_url {
            config.s3.endpoint_url = Some(endpoint_url.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = AppConfig::load_if_exists(&cli.config)
        .await
        .with_context(|| format!("加载配置失败: {}", cli.config))?;
    let from_file = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    cli.apply_to(&mut config);

    // 日志守卫需要保持到程序结束
    let _log_guard = logging::init_logging(&config.log);

    if from_file {
        info!("配置文件加载成功: {}", cli.config);
    } else {
        info!("配置文件不存在，使用默认配置: {}", cli.config);
    }

    config.validate()?;

    info!("S3 分片上传 v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "源目录: {:?}, bucket: {}, 检查点目录: {:?}",
        config.upload.source_dir, config.upload.bucket, config.checkpoint.dir
    );

    let api = Arc::new(S3MultipartApi::from_config(&config.s3).await);
    let store = CheckpointStore::new(config.checkpoint.dir.clone());
    let engine = UploadEngine::new(
        api,
        store,
        config.upload.bucket.clone(),
        config.upload.part_size_bytes(),
    )
    .with_remove_checkpoint(config.checkpoint.remove_on_complete);

    let manager = UploadManager::new(engine);
    let summary = manager.run(&config.upload.source_dir).await?;
    summary.log_summary();

    if !summary.is_success() {
        error!("{} 个文件上传失败，重新运行即可从检查点续传", summary.failed.len());
        anyhow::bail!(
            "{}/{} 个文件上传失败",
            summary.failed.len(),
            summary.total
        );
    }

    Ok(())
}
