//! 内存版分片上传服务（测试用）
//!
//! 行为模拟 S3：ETag 为分片 MD5，合并后会话即被删除，
//! 对已删除会话再次合并返回 SessionNotFound。支持按分片注入失败

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MultipartApi, PartRef, RemoteError};

#[derive(Debug)]
struct Session {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, (String, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<String, Session>,
    objects: HashMap<(String, String), Vec<u8>>,
    create_calls: usize,
    upload_calls: Vec<(String, i32, usize)>,
    complete_calls: Vec<(String, Vec<i32>)>,
    fail_upload: Option<(String, i32)>,
    fail_create: Option<String>,
    fail_complete: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryMultipartApi {
    state: Mutex<State>,
}

impl MemoryMultipartApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定 key 的第 `part_number` 个分片上传失败（一次性）
    pub fn fail_upload_at(&self, key: &str, part_number: i32) {
        self.state.lock().fail_upload = Some((key.to_string(), part_number));
    }

    pub fn fail_create_for(&self, key: &str) {
        self.state.lock().fail_create = Some(key.to_string());
    }

    pub fn fail_complete_for(&self, key: &str) {
        self.state.lock().fail_complete = Some(key.to_string());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().create_calls
    }

    /// (session_id, part_number, size)
    pub fn upload_calls(&self) -> Vec<(String, i32, usize)> {
        self.state.lock().upload_calls.clone()
    }

    /// (session_id, 提交的分片序号)
    pub fn complete_calls(&self) -> Vec<(String, Vec<i32>)> {
        self.state.lock().complete_calls.clone()
    }
}

#[async_trait]
impl MultipartApi for MemoryMultipartApi {
    async fn create_session(&self, bucket: &str, key: &str) -> Result<String, RemoteError> {
        let mut state = self.state.lock();
        state.create_calls += 1;
        if state.fail_create.as_deref() == Some(key) {
            return Err(RemoteError::service("CreateMultipartUpload", "injected failure"));
        }
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        state.sessions.insert(
            session_id.clone(),
            Session {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(session_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        session_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String, RemoteError> {
        let mut state = self.state.lock();
        if state.fail_upload.as_ref() == Some(&(key.to_string(), part_number)) {
            state.fail_upload = None;
            return Err(RemoteError::service("UploadPart", "injected failure"));
        }
        state
            .upload_calls
            .push((session_id.to_string(), part_number, data.len()));
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RemoteError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        let etag = format!("\"{:x}\"", md5::compute(&data));
        session.parts.insert(part_number, (etag.clone(), data));
        Ok(etag)
    }

    async fn complete_session(
        &self,
        _bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[PartRef],
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.complete_calls.push((
            session_id.to_string(),
            parts.iter().map(|p| p.part_number).collect(),
        ));
        if state.fail_complete.as_deref() == Some(key) {
            return Err(RemoteError::service("CompleteMultipartUpload", "injected failure"));
        }
        let session = state
            .sessions
            .remove(session_id)
            .ok_or_else(|| RemoteError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        let mut body = Vec::new();
        let mut last = 0;
        for part in parts {
            if part.part_number <= last {
                return Err(RemoteError::service("CompleteMultipartUpload", "InvalidPartOrder"));
            }
            last = part.part_number;
            match session.parts.get(&part.part_number) {
                Some((etag, data)) if *etag == part.integrity_token => body.extend_from_slice(data),
                _ => return Err(RemoteError::service("CompleteMultipartUpload", "InvalidPart")),
            }
        }
        state.objects.insert((session.bucket, session.key), body);
        Ok(())
    }
}
