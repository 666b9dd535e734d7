// 分片读取
//
// 定位到续传偏移后按固定大小读取，最后一片可能更短

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use super::UploadError;

/// 分片读取器
#[derive(Debug)]
pub struct PartReader {
    file: File,
    path: PathBuf,
    part_size: u64,
    offset: u64,
}

impl PartReader {
    /// 打开源文件
    pub async fn open(path: &Path, part_size: u64) -> Result<Self, UploadError> {
        let file = File::open(path)
            .await
            .map_err(|e| UploadError::source_io(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            part_size: part_size.max(1),
            offset: 0,
        })
    }

    /// 定位到续传偏移
    pub async fn seek_to(&mut self, offset: u64) -> Result<(), UploadError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| UploadError::source_io(&self.path, e))?;
        self.offset = offset;
        Ok(())
    }

    /// 读取下一个分片
    ///
    /// 除非到达文件末尾，否则总是读满 `part_size`。
    /// 返回 `None` 表示文件已在分片边界处读完
    pub async fn next_part(&mut self) -> Result<Option<Vec<u8>>, UploadError> {
        let mut buffer = Vec::with_capacity(self.part_size.min(64 * 1024 * 1024) as usize);
        let n = (&mut self.file)
            .take(self.part_size)
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| UploadError::source_io(&self.path, e))?;

        if n == 0 {
            return Ok(None);
        }

        debug!(
            "读取分片: {:?} bytes={}-{}, 大小={}",
            self.path,
            self.offset,
            self.offset + n as u64 - 1,
            n
        );
        self.offset += n as u64;
        Ok(Some(buffer))
    }

    /// 当前读取位置
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }
}
