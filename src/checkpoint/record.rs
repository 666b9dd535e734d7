//! 检查点记录格式
//!
//! 纯文本，按行组织：
//! ```text
//! {session_id}
//! {etag},{part_number},{size}
//! {etag},{part_number},{size}
//! ...
//! ```
//!
//! - 第 1 行为分片上传会话 ID
//! - 之后每行一个已完成分片，按上传顺序追加
//! - 没有校验和，也没有尾部元数据
//!
//! 解析是严格的：已以换行结束的行只要无法解析（包括空行）就视为损坏。
//! 唯一的例外是没有换行结尾的最后一行，它来自未完成的追加
//! （换行符和内容在同一次写入中落盘），从未被确认，直接丢弃。

use crate::remote::PartRef;

/// 已完成分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 远端返回的 ETag
    pub integrity_token: String,
    /// 分片序号（从 1 开始）
    pub part_number: i32,
    /// 实际上传字节数
    pub size: u64,
}

impl CompletedPart {
    pub fn new(integrity_token: impl Into<String>, part_number: i32, size: u64) -> Self {
        Self {
            integrity_token: integrity_token.into(),
            part_number,
            size,
        }
    }

    /// 序列化为记录行（含换行符）
    pub fn to_line(&self) -> String {
        format!("{},{},{}\n", self.integrity_token, self.part_number, self.size)
    }

    /// 解析记录行（不含换行符）
    ///
    /// 从右侧切分，ETag 中即使含有逗号也能正确解析
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let mut fields = line.rsplitn(3, ',');
        let size = fields.next();
        let part_number = fields.next();
        let token = fields.next();

        let (token, part_number, size) = match (token, part_number, size) {
            (Some(t), Some(p), Some(s)) => (t, p, s),
            _ => return Err(format!("字段数量错误: {:?}", line)),
        };

        if token.is_empty() {
            return Err("ETag 为空".to_string());
        }
        let part_number: i32 = part_number
            .trim()
            .parse()
            .map_err(|e| format!("分片序号无效 {:?}: {}", part_number, e))?;
        if part_number < 1 {
            return Err(format!("分片序号必须从 1 开始: {}", part_number));
        }
        let size: u64 = size
            .trim()
            .parse()
            .map_err(|e| format!("分片大小无效 {:?}: {}", size, e))?;
        if size == 0 {
            return Err(format!("分片 #{} 大小为 0", part_number));
        }

        Ok(Self::new(token, part_number, size))
    }

    pub fn to_part_ref(&self) -> PartRef {
        PartRef {
            part_number: self.part_number,
            integrity_token: self.integrity_token.clone(),
        }
    }
}

/// 一次分片上传会话的完整记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub session_id: String,
    pub parts: Vec<CompletedPart>,
}

impl CheckpointRecord {
    /// 续传偏移：所有已记录分片大小之和
    pub fn resume_offset(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }

    /// 序列化为完整文件内容
    pub fn to_content(&self) -> String {
        let mut content = format!("{}\n", self.session_id);
        for part in &self.parts {
            content.push_str(&part.to_line());
        }
        content
    }
}

/// 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCheckpoint {
    /// 没有可用会话（空文件，或会话行本身未写完）
    Empty {
        /// 文件中存在未写完的会话行
        torn: bool,
    },
    /// 已有会话
    Session {
        record: CheckpointRecord,
        /// 有效内容的字节长度（丢弃残缺尾行后）
        durable_len: u64,
        /// 被丢弃的残缺尾行
        dropped_tail: Option<String>,
    },
}

/// 记录损坏位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCorruption {
    /// 行号（从 1 开始）
    pub line: usize,
    pub reason: String,
}

fn corruption(line: usize, reason: impl Into<String>) -> RecordCorruption {
    RecordCorruption {
        line,
        reason: reason.into(),
    }
}

fn strip_newline(line: &str) -> (&str, bool) {
    match line.strip_suffix('\n') {
        Some(body) => (body.strip_suffix('\r').unwrap_or(body), true),
        None => (line, false),
    }
}

/// 解析检查点文件内容
pub fn parse_checkpoint(content: &str) -> Result<ParsedCheckpoint, RecordCorruption> {
    if content.is_empty() {
        return Ok(ParsedCheckpoint::Empty { torn: false });
    }

    let mut lines = content.split_inclusive('\n');

    // 第 1 行：会话 ID
    let first = lines.next().unwrap_or_default();
    let (session_id, terminated) = strip_newline(first);
    if !terminated {
        return Ok(ParsedCheckpoint::Empty { torn: true });
    }
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return Err(corruption(1, "缺少会话 ID"));
    }
    if session_id.contains(',') {
        return Err(corruption(1, format!("会话 ID 格式错误: {:?}", session_id)));
    }

    let mut durable_len = first.len() as u64;
    let mut parts: Vec<CompletedPart> = Vec::new();
    let mut dropped_tail = None;

    for (index, raw) in lines.enumerate() {
        let line_number = index + 2;
        let (body, terminated) = strip_newline(raw);

        if !terminated {
            // 最后一次追加未完成，从未被确认
            if !raw.is_empty() {
                dropped_tail = Some(raw.to_string());
            }
            break;
        }

        durable_len += raw.len() as u64;
        // 追加的每一行都非空，空行只可能来自外部写入
        if body.trim().is_empty() {
            return Err(corruption(line_number, "空行"));
        }

        let part = CompletedPart::parse_line(body).map_err(|e| corruption(line_number, e))?;
        let expected = parts.len() as i32 + 1;
        if part.part_number != expected {
            return Err(corruption(
                line_number,
                format!("分片序号不连续: 期望 #{}, 实际 #{}", expected, part.part_number),
            ));
        }
        parts.push(part);
    }

    Ok(ParsedCheckpoint::Session {
        record: CheckpointRecord {
            session_id: session_id.to_string(),
            parts,
        },
        durable_len,
        dropped_tail,
    })
}
