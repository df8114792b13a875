use serde::{Deserialize, Serialize};
use std::fmt;

/// 单个评分项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricItem {
    pub score: u32,
    pub max_score: u32,
    pub feedback: String,
}

impl RubricItem {
    /// 该项得分百分比
    pub fn percentage(&self) -> f64 {
        percentage(self.score, self.max_score)
    }
}

/// 100·score/max_score，先做整数乘法，只在除法处舍入一次
pub fn percentage(score: u32, max_score: u32) -> f64 {
    if max_score == 0 {
        return 0.0;
    }
    f64::from(score * 100) / f64::from(max_score)
}

/// DBQ / LEQ 评分明细（满分 6）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssayBreakdown {
    pub thesis: RubricItem,
    pub contextualization: RubricItem,
    pub evidence: RubricItem,
    pub analysis: RubricItem,
}

/// SAQ College Board 评分明细（满分 3）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaqCollegeBoardBreakdown {
    pub part_a: RubricItem,
    pub part_b: RubricItem,
    pub part_c: RubricItem,
}

/// SAQ EG 评分明细（满分 10）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaqEgBreakdown {
    pub criterion_a: RubricItem,
    pub criterion_c: RubricItem,
    pub criterion_e: RubricItem,
}

/// 评分明细，按 (作文类型, 评分方案) 区分形状
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rubric", rename_all = "snake_case")]
pub enum GradeBreakdown {
    Dbq(EssayBreakdown),
    Leq(EssayBreakdown),
    SaqCollegeBoard(SaqCollegeBoardBreakdown),
    SaqEg(SaqEgBreakdown),
}

impl GradeBreakdown {
    /// 按固定顺序列出 (key, item)
    pub fn items(&self) -> Vec<(&'static str, &RubricItem)> {
        match self {
            GradeBreakdown::Dbq(b) | GradeBreakdown::Leq(b) => vec![
                ("thesis", &b.thesis),
                ("contextualization", &b.contextualization),
                ("evidence", &b.evidence),
                ("analysis", &b.analysis),
            ],
            GradeBreakdown::SaqCollegeBoard(b) => vec![
                ("part_a", &b.part_a),
                ("part_b", &b.part_b),
                ("part_c", &b.part_c),
            ],
            GradeBreakdown::SaqEg(b) => vec![
                ("criterion_a", &b.criterion_a),
                ("criterion_c", &b.criterion_c),
                ("criterion_e", &b.criterion_e),
            ],
        }
    }

    /// 各项得分之和
    pub fn total_score(&self) -> u32 {
        self.items().iter().map(|(_, item)| item.score).sum()
    }

    /// 各项满分之和
    pub fn max_score(&self) -> u32 {
        self.items().iter().map(|(_, item)| item.max_score).sum()
    }
}

/// 字母等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

/// 字母等级分界线（百分比下限，含等号）
pub const LETTER_GRADE_BREAKPOINTS: [(f64, LetterGrade); 4] = [
    (90.0, LetterGrade::A),
    (80.0, LetterGrade::B),
    (70.0, LetterGrade::C),
    (60.0, LetterGrade::D),
];

impl LetterGrade {
    pub fn from_percentage(percentage: f64) -> Self {
        LETTER_GRADE_BREAKPOINTS
            .iter()
            .find(|(floor, _)| percentage >= *floor)
            .map(|(_, grade)| *grade)
            .unwrap_or(LetterGrade::F)
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        };
        f.write_str(s)
    }
}

/// 表现等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Exemplary,
    Proficient,
    Developing,
    Emerging,
    Beginning,
}

/// 表现等级分界线，与字母等级表相互独立
pub const PERFORMANCE_LEVEL_BREAKPOINTS: [(f64, PerformanceLevel); 4] = [
    (85.0, PerformanceLevel::Exemplary),
    (70.0, PerformanceLevel::Proficient),
    (50.0, PerformanceLevel::Developing),
    (30.0, PerformanceLevel::Emerging),
];

impl PerformanceLevel {
    pub fn from_percentage(percentage: f64) -> Self {
        PERFORMANCE_LEVEL_BREAKPOINTS
            .iter()
            .find(|(floor, _)| percentage >= *floor)
            .map(|(_, level)| *level)
            .unwrap_or(PerformanceLevel::Beginning)
    }

    pub fn label(self) -> &'static str {
        match self {
            PerformanceLevel::Exemplary => "Exemplary",
            PerformanceLevel::Proficient => "Proficient",
            PerformanceLevel::Developing => "Developing",
            PerformanceLevel::Emerging => "Emerging",
            PerformanceLevel::Beginning => "Beginning",
        }
    }
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 批改结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResponse {
    pub score: u32,
    pub max_score: u32,
    pub percentage: f64,
    pub letter_grade: LetterGrade,
    pub performance_level: PerformanceLevel,
    pub breakdown: GradeBreakdown,
    pub overall_feedback: String,
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    pub word_count: usize,
    pub paragraph_count: usize,
}
