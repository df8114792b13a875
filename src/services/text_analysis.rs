//! 文本分析服务 - 业务能力层
//!
//! 只负责字数、段落数统计和按作文类型的长度校验

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ValidationError;
use crate::models::essay::EssayType;

/// 空行分段
fn paragraph_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t\r]*\n").expect("paragraph regex is valid"))
}

/// 作文长度上下限（按词计）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBounds {
    pub min_words: usize,
    pub max_words: usize,
}

impl LengthBounds {
    pub const fn for_essay_type(essay_type: EssayType) -> Self {
        match essay_type {
            EssayType::Dbq => LengthBounds {
                min_words: 200,
                max_words: 2_500,
            },
            EssayType::Leq => LengthBounds {
                min_words: 150,
                max_words: 2_000,
            },
            // 三个小问合计
            EssayType::Saq => LengthBounds {
                min_words: 30,
                max_words: 900,
            },
        }
    }
}

/// 统计结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextStats {
    pub word_count: usize,
    pub paragraph_count: usize,
}

/// 按空白分词计数
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// 以空行分隔的非空段落数
pub fn paragraph_count(text: &str) -> usize {
    paragraph_break()
        .split(text)
        .filter(|p| !p.trim().is_empty())
        .count()
}

pub fn analyze(text: &str) -> TextStats {
    TextStats {
        word_count: word_count(text),
        paragraph_count: paragraph_count(text),
    }
}

/// 校验长度是否在该作文类型允许的范围内
pub fn check_length(essay_type: EssayType, stats: &TextStats) -> Result<(), ValidationError> {
    let bounds = LengthBounds::for_essay_type(essay_type);
    if stats.word_count < bounds.min_words {
        return Err(ValidationError::TooShort {
            essay_type,
            words: stats.word_count,
            min: bounds.min_words,
        });
    }
    if stats.word_count > bounds.max_words {
        return Err(ValidationError::TooLong {
            essay_type,
            words: stats.word_count,
            max: bounds.max_words,
        });
    }
    Ok(())
}
