// S3 Multipart Upload Library
// 可断点续传的 S3 目录分片上传

// 检查点模块（会话 ID + 已完成分片）
pub mod checkpoint;

// 配置管理模块
pub mod config;

// 日志系统
pub mod logging;

// 远端分片上传接口
pub mod remote;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use checkpoint::{CheckpointError, CheckpointStore, CompletedPart, CompletionOutcome};
pub use config::AppConfig;
pub use remote::{MultipartApi, PartRef, RemoteError, S3MultipartApi};
pub use uploader::{FileReport, RunSummary, UploadEngine, UploadError, UploadManager};
