//! 评分方案注册表 - 业务能力层
//!
//! 负责两件事：
//! - `resolve`：(作文类型, 评分方案) → 提示词模板 + 输出 JSON Schema + 计分规则
//! - `validate_and_convert`：校验 AI 的结构化输出并转换为 `GradeResponse`
//!
//! 分派通过 `Rubric` 枚举的穷尽 match 完成，新增评分方案时编译器会指出所有需要补充的地方。

use serde_json::{json, Map, Value};

use crate::error::{ConfigurationError, SchemaViolation};
use crate::models::essay::{EssayType, GradingRequest, RubricType};
use crate::models::grade::{
    percentage, EssayBreakdown, GradeBreakdown, GradeResponse, LetterGrade, PerformanceLevel,
    RubricItem, SaqCollegeBoardBreakdown, SaqEgBreakdown,
};
use crate::services::text_analysis::TextStats;

/// 评分项定义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RubricItemSpec {
    /// 输出 JSON 中的字段名
    pub key: &'static str,
    pub label: &'static str,
    pub max_score: u32,
    /// 给模型的评分标准说明
    pub criteria: &'static str,
}

const ESSAY_ITEMS: [RubricItemSpec; 4] = [
    RubricItemSpec {
        key: "thesis",
        label: "Thesis/Claim",
        max_score: 1,
        criteria: "1 point for a historically defensible thesis or claim that establishes a line of reasoning.",
    },
    RubricItemSpec {
        key: "contextualization",
        label: "Contextualization",
        max_score: 1,
        criteria: "1 point for describing a broader historical context relevant to the prompt.",
    },
    RubricItemSpec {
        key: "evidence",
        label: "Evidence",
        max_score: 2,
        criteria: "Up to 2 points for specific, relevant evidence used to support an argument in response to the prompt.",
    },
    RubricItemSpec {
        key: "analysis",
        label: "Analysis and Reasoning",
        max_score: 2,
        criteria: "Up to 2 points for historical reasoning (comparison, causation, continuity and change) and a complex understanding of the development.",
    },
];

const SAQ_COLLEGE_BOARD_ITEMS: [RubricItemSpec; 3] = [
    RubricItemSpec {
        key: "part_a",
        label: "Part A",
        max_score: 1,
        criteria: "1 point for accurately answering part A of the question.",
    },
    RubricItemSpec {
        key: "part_b",
        label: "Part B",
        max_score: 1,
        criteria: "1 point for accurately answering part B of the question.",
    },
    RubricItemSpec {
        key: "part_c",
        label: "Part C",
        max_score: 1,
        criteria: "1 point for accurately answering part C of the question.",
    },
];

const SAQ_EG_ITEMS: [RubricItemSpec; 3] = [
    RubricItemSpec {
        key: "criterion_a",
        label: "Criterion A: Knowledge and Understanding",
        max_score: 4,
        criteria: "Up to 4 points for accurate, relevant and detailed historical knowledge across all three parts.",
    },
    RubricItemSpec {
        key: "criterion_c",
        label: "Criterion C: Communication",
        max_score: 3,
        criteria: "Up to 3 points for clear, well-organised answers that directly address each part.",
    },
    RubricItemSpec {
        key: "criterion_e",
        label: "Criterion E: Use of Evidence",
        max_score: 3,
        criteria: "Up to 3 points for specific evidence and explanation that supports each answer.",
    },
];

/// 四种合法的 (作文类型, 评分方案) 组合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rubric {
    Dbq,
    Leq,
    SaqCollegeBoard,
    SaqEg,
}

impl Rubric {
    /// 选出评分方案。DBQ / LEQ 不接受 `rubric_type`；SAQ 缺省为 College Board。
    pub fn select(
        essay_type: EssayType,
        rubric_type: Option<RubricType>,
    ) -> Result<Self, ConfigurationError> {
        match (essay_type, rubric_type) {
            (EssayType::Dbq, None) => Ok(Rubric::Dbq),
            (EssayType::Leq, None) => Ok(Rubric::Leq),
            (EssayType::Saq, None | Some(RubricType::CollegeBoard)) => Ok(Rubric::SaqCollegeBoard),
            (EssayType::Saq, Some(RubricType::Eg)) => Ok(Rubric::SaqEg),
            (EssayType::Dbq | EssayType::Leq, Some(rubric_type)) => {
                Err(ConfigurationError::IllegalRubric {
                    essay_type,
                    rubric_type,
                })
            }
        }
    }

    pub fn essay_type(self) -> EssayType {
        match self {
            Rubric::Dbq => EssayType::Dbq,
            Rubric::Leq => EssayType::Leq,
            Rubric::SaqCollegeBoard | Rubric::SaqEg => EssayType::Saq,
        }
    }

    pub fn items(self) -> &'static [RubricItemSpec] {
        match self {
            Rubric::Dbq | Rubric::Leq => &ESSAY_ITEMS,
            Rubric::SaqCollegeBoard => &SAQ_COLLEGE_BOARD_ITEMS,
            Rubric::SaqEg => &SAQ_EG_ITEMS,
        }
    }

    /// 满分
    pub fn max_score(self) -> u32 {
        self.items().iter().map(|item| item.max_score).sum()
    }

    /// JSON Schema 名称
    pub fn schema_name(self) -> &'static str {
        match self {
            Rubric::Dbq => "dbq_grade",
            Rubric::Leq => "leq_grade",
            Rubric::SaqCollegeBoard => "saq_college_board_grade",
            Rubric::SaqEg => "saq_eg_grade",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Rubric::Dbq => "AP History Document-Based Question (DBQ)",
            Rubric::Leq => "AP History Long Essay Question (LEQ)",
            Rubric::SaqCollegeBoard => "AP History Short Answer Question (College Board rubric)",
            Rubric::SaqEg => "History Short Answer Question (EG criterion rubric)",
        }
    }
}

/// 计分规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringRules {
    pub items: &'static [RubricItemSpec],
    pub max_score: u32,
}

/// `resolve` 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRubric {
    pub rubric: Rubric,
    /// 系统提示词
    pub system_prompt: String,
    /// 用户消息模板，含 `{{PROMPT}}` / `{{RESPONSE}}` / `{{CONTEXT}}` 占位符
    pub user_template: &'static str,
    /// 严格模式 JSON Schema
    pub output_schema: Value,
    pub scoring: ScoringRules,
}

const ESSAY_USER_TEMPLATE: &str = r#"Essay prompt:
{{PROMPT}}

{{CONTEXT}}

Student essay:
"""
{{RESPONSE}}
"""

Grade the essay against every rubric row. Return JSON only."#;

const SAQ_USER_TEMPLATE: &str = r#"Question:
{{PROMPT}}

{{CONTEXT}}

Student answers:
{{RESPONSE}}

Grade the answers against every rubric row. Return JSON only."#;

/// 解析评分方案
pub fn resolve(
    essay_type: EssayType,
    rubric_type: Option<RubricType>,
) -> Result<ResolvedRubric, ConfigurationError> {
    let rubric = Rubric::select(essay_type, rubric_type)?;
    let user_template = match rubric.essay_type() {
        EssayType::Dbq | EssayType::Leq => ESSAY_USER_TEMPLATE,
        EssayType::Saq => SAQ_USER_TEMPLATE,
    };

    Ok(ResolvedRubric {
        rubric,
        system_prompt: build_system_prompt(rubric),
        user_template,
        output_schema: build_output_schema(rubric),
        scoring: ScoringRules {
            items: rubric.items(),
            max_score: rubric.max_score(),
        },
    })
}

fn build_system_prompt(rubric: Rubric) -> String {
    let rows: Vec<String> = rubric
        .items()
        .iter()
        .map(|item| {
            format!(
                "- `{}` ({}, max {}): {}",
                item.key, item.label, item.max_score, item.criteria
            )
        })
        .collect();

    format!(
        r#"You are an experienced AP History reader grading a {title}.

Rubric (total {max} points):
{rows}

Rules:
- Score every rubric row with an integer between 0 and its max. Set each row's `max_score` to exactly the max listed above.
- The top-level `score` must equal the sum of the row scores and `max_score` must be {max}.
- Each row's `feedback` must explain, in one to three sentences, why the points were or were not earned, quoting the student where helpful.
- `overall_feedback` summarises strengths and weaknesses; `suggestions` lists concrete next steps.
- Use `warnings` for problems with the submission itself (off-topic, copied prompt, illegible documents); leave it empty otherwise.
- Do not reward length for its own sake and do not invent content the student did not write."#,
        title = rubric.title(),
        max = rubric.max_score(),
        rows = rows.join("\n"),
    )
}

fn build_output_schema(rubric: Rubric) -> Value {
    let mut item_properties = Map::new();
    let mut item_keys = Vec::new();
    for item in rubric.items() {
        item_properties.insert(
            item.key.to_string(),
            json!({
                "type": "object",
                "description": format!("{} (0-{} points)", item.label, item.max_score),
                "properties": {
                    "score": { "type": "integer" },
                    "max_score": { "type": "integer" },
                    "feedback": { "type": "string" }
                },
                "required": ["score", "max_score", "feedback"],
                "additionalProperties": false
            }),
        );
        item_keys.push(item.key);
    }

    json!({
        "type": "object",
        "properties": {
            "score": { "type": "integer" },
            "max_score": { "type": "integer" },
            "breakdown": {
                "type": "object",
                "properties": item_properties,
                "required": item_keys,
                "additionalProperties": false
            },
            "overall_feedback": { "type": "string" },
            "suggestions": { "type": "array", "items": { "type": "string" } },
            "warnings": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["score", "max_score", "breakdown", "overall_feedback", "suggestions", "warnings"],
        "additionalProperties": false
    })
}

impl ResolvedRubric {
    /// 按模板拼装用户消息
    pub fn render_user_message(
        &self,
        request: &GradingRequest,
        stats: &TextStats,
        attached_documents: usize,
    ) -> String {
        let mut context = vec![format!(
            "Submission length: {} words in {} paragraphs.",
            stats.word_count, stats.paragraph_count
        )];
        if let Some(saq_type) = request.saq_type {
            context.push(saq_type.prompt_hint().to_string());
        }
        if attached_documents > 0 {
            context.push(format!(
                "The {} source documents for this question are attached as images, in order (Document 1 to Document {}). Judge document use against them.",
                attached_documents, attached_documents
            ));
        }

        let response = match (&request.essay_text, &request.saq_parts) {
            (Some(text), _) => text.trim().to_string(),
            (None, Some(parts)) => format!(
                "(a) {}\n\n(b) {}\n\n(c) {}",
                parts.part_a.trim(),
                parts.part_b.trim(),
                parts.part_c.trim()
            ),
            (None, None) => String::new(),
        };

        self.user_template
            .replace("{{PROMPT}}", request.prompt.trim())
            .replace("{{CONTEXT}}", &context.join("\n"))
            .replace("{{RESPONSE}}", &response)
    }

    pub fn validate_and_convert(
        &self,
        raw: &Value,
        word_count: usize,
        paragraph_count: usize,
    ) -> Result<GradeResponse, SchemaViolation> {
        validate_and_convert(self.rubric, raw, word_count, paragraph_count)
    }
}

// ========== 输出校验 ==========

/// 结构检查阶段读出的原始评分项
struct RawItem {
    spec: &'static RubricItemSpec,
    score: i64,
    max_score: i64,
    feedback: String,
}

/// 校验 AI 输出并转换为 `GradeResponse`
///
/// 依次执行：结构检查 → 范围与满分常量检查 → 求和检查 → 派生百分比、字母等级、表现等级。
/// 前三步的任何失败都返回 `SchemaViolation`，不做任何修正。
pub fn validate_and_convert(
    rubric: Rubric,
    raw: &Value,
    word_count: usize,
    paragraph_count: usize,
) -> Result<GradeResponse, SchemaViolation> {
    // (a) 结构
    let root = expect_object(raw, "$")?;
    let reported_score = expect_integer(root, "score", "$")?;
    let reported_max = match root.get("max_score") {
        None | Some(Value::Null) => None,
        Some(_) => Some(expect_integer(root, "max_score", "$")?),
    };
    let breakdown = expect_object(require(root, "breakdown", "$")?, "$.breakdown")?;

    let mut raw_items = Vec::with_capacity(rubric.items().len());
    for spec in rubric.items() {
        let path = format!("$.breakdown.{}", spec.key);
        let item = expect_object(require(breakdown, spec.key, "$.breakdown")?, &path)?;
        let score = expect_integer(item, "score", &path)?;
        let max_score = expect_integer(item, "max_score", &path)?;
        let feedback = expect_string(item, "feedback", &path)?.trim().to_string();
        if feedback.is_empty() {
            return Err(SchemaViolation::EmptyFeedback { item: spec.key });
        }
        raw_items.push(RawItem {
            spec,
            score,
            max_score,
            feedback,
        });
    }

    let overall_feedback = expect_string(root, "overall_feedback", "$")?.trim().to_string();
    let suggestions = expect_string_array(root, "suggestions")?;
    let warnings = match root.get("warnings") {
        None | Some(Value::Null) => Vec::new(),
        Some(_) => expect_string_array(root, "warnings")?,
    };

    // (b) 满分常量与得分范围
    for item in &raw_items {
        if item.max_score != i64::from(item.spec.max_score) {
            return Err(SchemaViolation::MaxScoreMismatch {
                item: item.spec.key,
                expected: item.spec.max_score,
                actual: item.max_score,
            });
        }
        if item.score < 0 || item.score > item.max_score {
            return Err(SchemaViolation::ScoreOutOfRange {
                item: item.spec.key,
                score: item.score,
                max_score: item.max_score,
            });
        }
    }
    let max_score = rubric.max_score();
    if let Some(actual) = reported_max {
        if actual != i64::from(max_score) {
            return Err(SchemaViolation::TotalMaxScoreMismatch {
                expected: max_score,
                actual,
            });
        }
    }

    // (c) 求和
    let sum: i64 = raw_items.iter().map(|item| item.score).sum();
    if sum != reported_score {
        return Err(SchemaViolation::ScoreSumMismatch {
            reported: reported_score,
            sum,
        });
    }

    // (d)(e) 派生字段；上面已保证 0 <= score <= max
    let score = sum as u32;
    let items: Vec<RubricItem> = raw_items
        .into_iter()
        .map(|item| RubricItem {
            score: item.score as u32,
            max_score: item.spec.max_score,
            feedback: item.feedback,
        })
        .collect();
    let breakdown = assemble_breakdown(rubric, items).ok_or_else(|| SchemaViolation::MissingField {
        path: "$.breakdown".to_string(),
    })?;

    let percentage = percentage(score, max_score);

    Ok(GradeResponse {
        score,
        max_score,
        percentage,
        letter_grade: LetterGrade::from_percentage(percentage),
        performance_level: PerformanceLevel::from_percentage(percentage),
        breakdown,
        overall_feedback,
        suggestions,
        warnings: if warnings.is_empty() {
            None
        } else {
            Some(warnings)
        },
        word_count,
        paragraph_count,
    })
}

fn assemble_breakdown(rubric: Rubric, items: Vec<RubricItem>) -> Option<GradeBreakdown> {
    match rubric {
        Rubric::Dbq | Rubric::Leq => {
            let [thesis, contextualization, evidence, analysis]: [RubricItem; 4] =
                items.try_into().ok()?;
            let breakdown = EssayBreakdown {
                thesis,
                contextualization,
                evidence,
                analysis,
            };
            Some(if rubric == Rubric::Dbq {
                GradeBreakdown::Dbq(breakdown)
            } else {
                GradeBreakdown::Leq(breakdown)
            })
        }
        Rubric::SaqCollegeBoard => {
            let [part_a, part_b, part_c]: [RubricItem; 3] = items.try_into().ok()?;
            Some(GradeBreakdown::SaqCollegeBoard(SaqCollegeBoardBreakdown {
                part_a,
                part_b,
                part_c,
            }))
        }
        Rubric::SaqEg => {
            let [criterion_a, criterion_c, criterion_e]: [RubricItem; 3] = items.try_into().ok()?;
            Some(GradeBreakdown::SaqEg(SaqEgBreakdown {
                criterion_a,
                criterion_c,
                criterion_e,
            }))
        }
    }
}

fn expect_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, SchemaViolation> {
    value.as_object().ok_or_else(|| SchemaViolation::WrongType {
        path: path.to_string(),
        expected: "object",
    })
}

fn require<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    parent: &str,
) -> Result<&'a Value, SchemaViolation> {
    obj.get(key).ok_or_else(|| SchemaViolation::MissingField {
        path: format!("{}.{}", parent, key),
    })
}

fn expect_integer(obj: &Map<String, Value>, key: &str, parent: &str) -> Result<i64, SchemaViolation> {
    require(obj, key, parent)?
        .as_i64()
        .ok_or_else(|| SchemaViolation::WrongType {
            path: format!("{}.{}", parent, key),
            expected: "integer",
        })
}

fn expect_string<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    parent: &str,
) -> Result<&'a str, SchemaViolation> {
    require(obj, key, parent)?
        .as_str()
        .ok_or_else(|| SchemaViolation::WrongType {
            path: format!("{}.{}", parent, key),
            expected: "string",
        })
}

fn expect_string_array(obj: &Map<String, Value>, key: &str) -> Result<Vec<String>, SchemaViolation> {
    let wrong_type = || SchemaViolation::WrongType {
        path: format!("$.{}", key),
        expected: "array of strings",
    };
    require(obj, key, "$")?
        .as_array()
        .ok_or_else(wrong_type)?
        .iter()
        .map(|v| v.as_str().map(|s| s.trim().to_string()).ok_or_else(wrong_type))
        .collect()
}
