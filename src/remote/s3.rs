//! S3 兼容存储的分片上传实现
//!
//! 基于 aws-sdk-s3，鉴权与重试策略沿用 SDK 默认配置链

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::{MultipartApi, PartRef, RemoteError};
use crate::config::S3Config;

/// S3 返回的"上传会话不存在"错误码
const NO_SUCH_UPLOAD: &str = "NoSuchUpload";

/// S3 分片上传客户端
///
/// `Client` 内部已是 Arc，克隆开销很小，可被所有上传任务共享
#[derive(Clone, Debug)]
pub struct S3MultipartApi {
    client: Client,
}

impl S3MultipartApi {
    /// 从已有 SDK 客户端创建
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 根据配置构建客户端
    ///
    /// 未配置 region 时使用默认提供链（环境变量 / profile / IMDS）
    pub async fn from_config(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        // MinIO 等 S3 兼容服务需要 path-style
        builder = builder.force_path_style(config.force_path_style);

        info!(
            "S3 客户端初始化完成: region={:?}, endpoint={:?}, path_style={}",
            sdk_config.region(),
            config.endpoint_url,
            config.force_path_style
        );

        Self::new(Client::from_conf(builder.build()))
    }
}

/// 将 SDK 错误映射为 RemoteError，识别 NoSuchUpload
fn map_sdk_error<E, R>(
    operation: &'static str,
    session_id: &str,
    err: SdkError<E, R>,
) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = err.as_service_error().and_then(|e| e.code());
    if code == Some(NO_SUCH_UPLOAD) {
        return RemoteError::SessionNotFound {
            session_id: session_id.to_string(),
        };
    }
    RemoteError::service(operation, DisplayErrorContext(&err).to_string())
}

#[async_trait]
impl MultipartApi for S3MultipartApi {
    async fn create_session(&self, bucket: &str, key: &str) -> Result<String, RemoteError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("CreateMultipartUpload", "", e))?;

        let upload_id = output.upload_id().ok_or_else(|| {
            RemoteError::service("CreateMultipartUpload", "响应中缺少 UploadId")
        })?;

        debug!("创建分片上传会话: bucket={}, key={}, upload_id={}", bucket, key, upload_id);
        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String, RemoteError> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(session_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error("UploadPart", session_id, e))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| RemoteError::service("UploadPart", "响应中缺少 ETag"))
    }

    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[PartRef],
    ) -> Result<(), RemoteError> {
        let completed_parts = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.integrity_token)
                    .build()
            })
            .collect::<Vec<_>>();

        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(session_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| map_sdk_error("CompleteMultipartUpload", session_id, e))?;

        Ok(())
    }
}
