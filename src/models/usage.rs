use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 配额窗口，声明顺序即检查顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageWindow {
    RequestsPerMinute,
    EssaysPerHour,
    EssaysPerDay,
    WordsPerDay,
}

impl UsageWindow {
    /// 固定检查顺序
    pub const CHECK_ORDER: [UsageWindow; 4] = [
        UsageWindow::RequestsPerMinute,
        UsageWindow::EssaysPerHour,
        UsageWindow::EssaysPerDay,
        UsageWindow::WordsPerDay,
    ];

    /// 窗口长度；窗口起点按该长度对齐 UTC 纪元
    pub fn span(self) -> TimeDelta {
        match self {
            UsageWindow::RequestsPerMinute => TimeDelta::minutes(1),
            UsageWindow::EssaysPerHour => TimeDelta::hours(1),
            UsageWindow::EssaysPerDay | UsageWindow::WordsPerDay => TimeDelta::days(1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UsageWindow::RequestsPerMinute => "requests_per_minute",
            UsageWindow::EssaysPerHour => "essays_per_hour",
            UsageWindow::EssaysPerDay => "essays_per_day",
            UsageWindow::WordsPerDay => "words_per_day",
        }
    }
}

impl fmt::Display for UsageWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 各窗口上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageLimits {
    pub requests_per_minute: u64,
    pub essays_per_hour: u64,
    pub essays_per_day: u64,
    pub words_per_day: u64,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 20,
            essays_per_hour: 30,
            essays_per_day: 100,
            words_per_day: 150_000,
        }
    }
}

impl UsageLimits {
    pub fn ceiling(&self, window: UsageWindow) -> u64 {
        match window {
            UsageWindow::RequestsPerMinute => self.requests_per_minute,
            UsageWindow::EssaysPerHour => self.essays_per_hour,
            UsageWindow::EssaysPerDay => self.essays_per_day,
            UsageWindow::WordsPerDay => self.words_per_day,
        }
    }
}

/// 每个窗口的下一次重置时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextResets {
    pub requests_per_minute: DateTime<Utc>,
    pub essays_per_hour: DateTime<Utc>,
    pub essays_per_day: DateTime<Utc>,
    pub words_per_day: DateTime<Utc>,
}

/// 配额使用概览
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub essays_remaining_today: u64,
    pub words_remaining_today: u64,
    pub requests_remaining_this_minute: u64,
    pub essays_remaining_this_hour: u64,
    pub next_reset: NextResets,
}
