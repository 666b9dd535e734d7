// 远端分片上传接口
//
// 上传核心只依赖 MultipartApi trait：
// - create_session:   创建分片上传会话，返回 session id
// - upload_part:      上传单个分片，返回该分片的 ETag
// - complete_session: 按顺序提交全部分片，合并为最终对象
//
// 重试、退避、鉴权、超时均由具体实现（S3 SDK）负责，核心不做任何重试

pub mod s3;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use s3::S3MultipartApi;

/// 提交合并时引用的分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRef {
    /// 分片序号（从 1 开始）
    pub part_number: i32,
    /// 上传分片时远端返回的 ETag
    pub integrity_token: String,
}

/// 远端调用错误
#[derive(Debug, Error)]
pub enum RemoteError {
    /// 会话不存在（已合并完成或已过期）
    #[error("分片上传会话不存在: {session_id}")]
    SessionNotFound { session_id: String },

    /// 其他服务端/网络错误
    #[error("{operation} 失败: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },
}

impl RemoteError {
    pub fn service(operation: &'static str, message: impl Into<String>) -> Self {
        RemoteError::Service {
            operation,
            message: message.into(),
        }
    }

    pub fn is_session_not_found(&self) -> bool {
        matches!(self, RemoteError::SessionNotFound { .. })
    }
}

/// 远端分片上传 API
///
/// 实现必须是无状态、可跨任务复用的（以 `Arc<dyn MultipartApi>` 共享）
#[async_trait]
pub trait MultipartApi: Send + Sync {
    /// 创建分片上传会话
    async fn create_session(&self, bucket: &str, key: &str) -> Result<String, RemoteError>;

    /// 上传一个分片，返回 ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String, RemoteError>;

    /// 合并分片
    ///
    /// `parts` 必须按 part_number 严格递增排列
    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[PartRef],
    ) -> Result<(), RemoteError>;
}
