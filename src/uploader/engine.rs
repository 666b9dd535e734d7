// 上传引擎
//
// 负责把单个文件从续传点一直上传到远端合并完成：
// 1. 打开源文件，再打开/创建检查点和上传会话
// 2. 按已完成分片大小之和定位源文件
// 3. 逐片读取 → 上传 → 写入检查点（fsync 后才算完成）
// 4. 读到文件末尾后，以全部分片（含恢复的分片）合并
//
// 同一文件内分片严格按序号顺序上传和记录，续传偏移依赖连续的已完成前缀。
// 分片上传失败直接中止该文件，不在此处重试。
// 续传时不校验源文件内容是否被修改，直接信任记录的分片大小。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, info_span, Instrument};

use super::part::PartReader;
use super::{object_key_for, UploadError, MAX_PART_COUNT};
use crate::checkpoint::{CheckpointStore, CompletedPart, CompletionOutcome};
use crate::remote::MultipartApi;

/// 单个文件的上传结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    /// 源文件路径
    pub source: PathBuf,
    /// 对象 key
    pub key: String,
    /// 上传会话 ID
    pub session_id: String,
    /// 合并时提交的分片总数
    pub total_parts: usize,
    /// 从检查点恢复的分片数
    pub resumed_parts: usize,
    /// 本次运行上传的分片数
    pub uploaded_parts: usize,
    /// 本次运行上传的字节数
    pub uploaded_bytes: u64,
    /// 合并结果
    pub outcome: CompletionOutcome,
}

/// 上传引擎
///
/// 可被多个任务共享（内部只有无状态的客户端和配置）
#[derive(Clone)]
pub struct UploadEngine {
    api: Arc<dyn MultipartApi>,
    store: CheckpointStore,
    bucket: String,
    part_size: u64,
    remove_checkpoint: bool,
}

impl UploadEngine {
    pub fn new(
        api: Arc<dyn MultipartApi>,
        store: CheckpointStore,
        bucket: impl Into<String>,
        part_size: u64,
    ) -> Self {
        Self {
            api,
            store,
            bucket: bucket.into(),
            part_size,
            remove_checkpoint: true,
        }
    }

    /// 合并完成后是否删除检查点（默认删除）
    pub fn with_remove_checkpoint(mut self, remove: bool) -> Self {
        self.remove_checkpoint = remove;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// 上传单个文件
    pub async fn upload_file(&self, source: &Path) -> Result<FileReport, UploadError> {
        let key = object_key_for(source);
        let span = info_span!("upload", file = %source.display(), key = %key);
        self.run(source, key).instrument(span).await
    }

    async fn run(&self, source: &Path, key: String) -> Result<FileReport, UploadError> {
        let api = self.api.as_ref();
        // 先打开源文件，源文件已消失时不创建远端会话和检查点
        let mut reader = PartReader::open(source, self.part_size).await?;
        let mut checkpoint = self.store.open(api, &self.bucket, &key, source).await?;

        let offset = checkpoint.resume_offset();
        reader.seek_to(offset).await?;

        if checkpoint.resumed_parts() > 0 {
            info!(
                "断点续传: 已完成 {} 个分片, 从偏移 {} 继续",
                checkpoint.resumed_parts(),
                offset
            );
        } else {
            info!("开始上传: s3://{}/{}", self.bucket, key);
        }

        let mut uploaded_parts = 0usize;
        let mut uploaded_bytes = 0u64;

        while let Some(data) = reader.next_part().await? {
            let part_number = checkpoint.next_part_number();
            if part_number > MAX_PART_COUNT {
                return Err(UploadError::TooManyParts);
            }

            let size = data.len() as u64;
            info!("上传分片 #{} ({} bytes)", part_number, size);

            let etag = api
                .upload_part(&self.bucket, &key, checkpoint.session_id(), part_number, data)
                .await
                .map_err(|source| UploadError::Part {
                    part_number,
                    source,
                })?;

            checkpoint
                .save(CompletedPart::new(etag, part_number, size))
                .await?;

            uploaded_parts += 1;
            uploaded_bytes += size;
        }

        let session_id = checkpoint.session_id().to_string();
        let total_parts = checkpoint.parts().len();
        let resumed_parts = checkpoint.resumed_parts();
        let outcome = checkpoint.complete(api, self.remove_checkpoint).await?;

        Ok(FileReport {
            source: source.to_path_buf(),
            key,
            session_id,
            total_parts,
            resumed_parts,
            uploaded_parts,
            uploaded_bytes,
            outcome,
        })
    }
}
