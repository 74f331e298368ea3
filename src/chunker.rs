use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// 文本切片结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// 切片内容
    pub content: String,
    /// 在原文中的起始位置 (字符下标)
    pub start_pos: usize,
    /// 在原文中的结束位置 (字符下标，不含)
    pub end_pos: usize,
}

/// 将文本按字符数切分为带重叠的片段
///
/// # 策略
/// 1. 窗口长度不超过 `chunk_size` 个字符 (按字符而非字节计算，中文安全)
/// 2. 窗口末尾优先回退到后半段中最后一个换行或空白处
/// 3. 相邻切片共享 `chunk_overlap` 个字符
/// 4. 切片去除首尾空白，空切片被丢弃
///
/// # 参数
/// - `content`: 文本内容
/// - `chunk_size`: 每个切片的最大字符数
/// - `chunk_overlap`: 相邻切片的重叠字符数，必须小于 `chunk_size`
pub fn split_text(content: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 || chunk_overlap >= chunk_size {
        return Err(ServiceError::InvalidChunking {
            chunk_size,
            chunk_overlap,
        });
    }

    let chars: Vec<char> = content.chars().collect();
    let total = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end < total {
            soft_boundary(&chars, start, hard_end)
        } else {
            hard_end
        };

        let window: String = chars[start..end].iter().collect();
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            chunks.push(Chunk {
                content: trimmed.to_string(),
                start_pos: start,
                end_pos: end,
            });
        }

        if end >= total {
            break;
        }

        // 至少前进一个字符，避免死循环
        start = end.saturating_sub(chunk_overlap).max(start + 1);
    }

    Ok(chunks)
}

/// 在窗口后半段寻找最后一个换行 (其次空白) 作为切分点
fn soft_boundary(chars: &[char], start: usize, hard_end: usize) -> usize {
    let half = start + (hard_end - start) / 2;
    let window = &chars[half..hard_end];

    if let Some(i) = window.iter().rposition(|&c| c == '\n') {
        return half + i + 1;
    }
    if let Some(i) = window.iter().rposition(|c| c.is_whitespace()) {
        return half + i + 1;
    }
    hard_end
}
