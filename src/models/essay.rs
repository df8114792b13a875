use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 作文类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EssayType {
    /// Document-Based Question
    Dbq,
    /// Long Essay Question
    Leq,
    /// Short Answer Question
    Saq,
}

/// 字符串别名表（小写）
static ESSAY_TYPE_ALIASES: phf::Map<&'static str, EssayType> = phf::phf_map! {
    "dbq" => EssayType::Dbq,
    "document-based" => EssayType::Dbq,
    "document_based" => EssayType::Dbq,
    "leq" => EssayType::Leq,
    "long-essay" => EssayType::Leq,
    "long_essay" => EssayType::Leq,
    "saq" => EssayType::Saq,
    "short-answer" => EssayType::Saq,
    "short_answer" => EssayType::Saq,
};

impl EssayType {
    /// 标准名称
    pub fn as_str(self) -> &'static str {
        match self {
            EssayType::Dbq => "DBQ",
            EssayType::Leq => "LEQ",
            EssayType::Saq => "SAQ",
        }
    }

    /// 是否为整篇作文（DBQ / LEQ），即需要 `essay_text`
    pub fn is_full_essay(self) -> bool {
        matches!(self, EssayType::Dbq | EssayType::Leq)
    }
}

impl FromStr for EssayType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ESSAY_TYPE_ALIASES
            .get(s.trim().to_lowercase().as_str())
            .copied()
            .ok_or_else(|| format!("unknown essay type: {}", s))
    }
}

impl TryFrom<String> for EssayType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EssayType> for String {
    fn from(value: EssayType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EssayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SAQ 评分方案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RubricType {
    /// College Board 3 分制
    #[default]
    CollegeBoard,
    /// EG 10 分制（criterion A / C / E）
    Eg,
}

impl fmt::Display for RubricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RubricType::CollegeBoard => f.write_str("college_board"),
            RubricType::Eg => f.write_str("eg"),
        }
    }
}

/// SAQ 题型，只影响提示词措辞
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaqType {
    Stimulus,
    NonStimulus,
    SecondaryComparison,
}

impl SaqType {
    /// 提示词中对题型的描述
    pub fn prompt_hint(self) -> &'static str {
        match self {
            SaqType::Stimulus => {
                "This SAQ is stimulus-based: the student was given a primary or secondary source and should use it where the question asks."
            }
            SaqType::NonStimulus => {
                "This SAQ has no stimulus: the student must rely entirely on their own historical knowledge."
            }
            SaqType::SecondaryComparison => {
                "This SAQ compares two secondary-source interpretations: reward answers that engage accurately with both historians' arguments."
            }
        }
    }
}

/// SAQ 三个小问的作答
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaqParts {
    pub part_a: String,
    pub part_b: String,
    pub part_c: String,
}

impl SaqParts {
    pub fn new(
        part_a: impl Into<String>,
        part_b: impl Into<String>,
        part_c: impl Into<String>,
    ) -> Self {
        Self {
            part_a: part_a.into(),
            part_b: part_b.into(),
            part_c: part_c.into(),
        }
    }

    /// 按 (名称, 内容) 顺序遍历三个小问
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("part_a", self.part_a.as_str()),
            ("part_b", self.part_b.as_str()),
            ("part_c", self.part_c.as_str()),
        ]
        .into_iter()
    }
}

/// 批改请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingRequest {
    pub essay_type: EssayType,
    /// 题目
    pub prompt: String,
    /// DBQ / LEQ 正文
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essay_text: Option<String>,
    /// SAQ 作答
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saq_parts: Option<SaqParts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saq_type: Option<SaqType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_type: Option<RubricType>,
    /// 已上传的 DBQ 文档组
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_set_id: Option<String>,
}

impl GradingRequest {
    /// 创建 DBQ / LEQ 请求
    pub fn essay(
        essay_type: EssayType,
        prompt: impl Into<String>,
        essay_text: impl Into<String>,
    ) -> Self {
        Self {
            essay_type,
            prompt: prompt.into(),
            essay_text: Some(essay_text.into()),
            saq_parts: None,
            saq_type: None,
            rubric_type: None,
            document_set_id: None,
        }
    }

    /// 创建 SAQ 请求
    pub fn saq(prompt: impl Into<String>, parts: SaqParts) -> Self {
        Self {
            essay_type: EssayType::Saq,
            prompt: prompt.into(),
            essay_text: None,
            saq_parts: Some(parts),
            saq_type: None,
            rubric_type: None,
            document_set_id: None,
        }
    }

    pub fn with_rubric(mut self, rubric_type: RubricType) -> Self {
        self.rubric_type = Some(rubric_type);
        self
    }

    pub fn with_saq_type(mut self, saq_type: SaqType) -> Self {
        self.saq_type = Some(saq_type);
        self
    }

    pub fn with_document_set(mut self, document_set_id: impl Into<String>) -> Self {
        self.document_set_id = Some(document_set_id.into());
        self
    }

    /// 作答原文（SAQ 为三个小问拼接），用于配额预估和字数统计
    pub fn raw_text(&self) -> String {
        match (&self.essay_text, &self.saq_parts) {
            (Some(text), _) => text.clone(),
            (None, Some(parts)) => parts
                .iter()
                .map(|(_, answer)| answer)
                .collect::<Vec<_>>()
                .join("\n\n"),
            (None, None) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_essay_type_parse_aliases() {
        assert_eq!("DBQ".parse::<EssayType>().unwrap(), EssayType::Dbq);
        assert_eq!(" leq ".parse::<EssayType>().unwrap(), EssayType::Leq);
        assert_eq!("short-answer".parse::<EssayType>().unwrap(), EssayType::Saq);
        assert!("essay".parse::<EssayType>().is_err());
    }

    #[test]
    fn test_request_deserialize_defaults() {
        let json = r#"{
            "essay_type": "saq",
            "prompt": "Explain one cause of the French Revolution.",
            "saq_parts": {"part_a": "a", "part_b": "b", "part_c": "c"}
        }"#;
        let request: GradingRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.essay_type, EssayType::Saq);
        assert_eq!(request.rubric_type, None);
        assert!(request.essay_text.is_none());

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["essay_type"], "SAQ");
        assert!(value.get("document_set_id").is_none());
    }

    #[test]
    fn test_raw_text_joins_saq_parts() {
        let request = GradingRequest::saq("p", SaqParts::new("one", "two", "three"));
        assert_eq!(request.raw_text(), "one\n\ntwo\n\nthree");
    }
}
