//! 用量与频率守卫 - 业务能力层
//!
//! 四个相互独立的固定窗口：每分钟请求数、每小时作文数、每日作文数、每日字数。
//!
//! - `check`：只读检查，按固定顺序返回第一个超限的窗口
//! - `admit`：每次提交最先调用，检查并计入每分钟请求数（无论之后是否成功）
//! - `reserve`：同一把锁内检查三个作文 / 字数窗口，并为一篇作文预留额度
//! - `commit`：批改成功后把预留额度转为正式计数；未提交的 `UsageTicket` 在 drop 时归还预留
//!
//! 四个计数器由同一个 `Mutex` 保护，保证检查与提交看到一致的快照。

use chrono::{DateTime, DurationRound, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::QuotaExceeded;
use crate::infrastructure::Clock;
use crate::models::usage::{NextResets, UsageLimits, UsageSummary, UsageWindow};

/// 用量守卫
pub trait UsageGuard: Send + Sync {
    /// 只读检查
    fn check(&self, estimated_words: u64) -> Result<(), QuotaExceeded>;

    /// 计入一次请求；每分钟请求数已满时拒绝
    fn admit(&self) -> Result<(), QuotaExceeded>;

    /// 检查并预留一篇作文的额度（不计请求数）
    fn reserve(&self, estimated_words: u64) -> Result<UsageTicket, QuotaExceeded>;

    /// 批改成功后提交
    fn commit(&self, ticket: UsageTicket, actual_words: u64);

    /// 各窗口剩余额度与下一次重置时间
    fn summary(&self) -> UsageSummary;
}

/// 预留凭证
///
/// drop 时若尚未提交，自动归还预留额度；请求计数不归还。
pub struct UsageTicket {
    reserved_words: u64,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl UsageTicket {
    pub fn new(reserved_words: u64, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            reserved_words,
            release: Some(Box::new(release)),
        }
    }

    pub fn reserved_words(&self) -> u64 {
        self.reserved_words
    }

    /// 取消自动归还，返回预留的字数
    pub fn disarm(mut self) -> u64 {
        self.release = None;
        self.reserved_words
    }
}

impl fmt::Debug for UsageTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageTicket")
            .field("reserved_words", &self.reserved_words)
            .field("armed", &self.release.is_some())
            .finish()
    }
}

impl Drop for UsageTicket {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// 单个窗口计数器
#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    window_start: DateTime<Utc>,
}

#[derive(Debug)]
struct UsageState {
    requests_this_minute: Counter,
    essays_this_hour: Counter,
    essays_this_day: Counter,
    words_this_day: Counter,
    /// 已预留、尚未提交的作文数和字数
    pending_essays: u64,
    pending_words: u64,
}

/// 窗口起点：按窗口长度向下取整（分钟整点、小时整点、UTC 零点）
pub fn window_start(now: DateTime<Utc>, window: UsageWindow) -> DateTime<Utc> {
    now.duration_trunc(window.span()).unwrap_or(now)
}

/// 下一次重置时间
pub fn next_reset(now: DateTime<Utc>, window: UsageWindow) -> DateTime<Utc> {
    window_start(now, window) + window.span()
}

impl UsageState {
    fn new(now: DateTime<Utc>) -> Self {
        let counter = |window| Counter {
            value: 0,
            window_start: window_start(now, window),
        };
        Self {
            requests_this_minute: counter(UsageWindow::RequestsPerMinute),
            essays_this_hour: counter(UsageWindow::EssaysPerHour),
            essays_this_day: counter(UsageWindow::EssaysPerDay),
            words_this_day: counter(UsageWindow::WordsPerDay),
            pending_essays: 0,
            pending_words: 0,
        }
    }

    fn counter_mut(&mut self, window: UsageWindow) -> &mut Counter {
        match window {
            UsageWindow::RequestsPerMinute => &mut self.requests_this_minute,
            UsageWindow::EssaysPerHour => &mut self.essays_this_hour,
            UsageWindow::EssaysPerDay => &mut self.essays_this_day,
            UsageWindow::WordsPerDay => &mut self.words_this_day,
        }
    }

    fn counter(&self, window: UsageWindow) -> &Counter {
        match window {
            UsageWindow::RequestsPerMinute => &self.requests_this_minute,
            UsageWindow::EssaysPerHour => &self.essays_this_hour,
            UsageWindow::EssaysPerDay => &self.essays_this_day,
            UsageWindow::WordsPerDay => &self.words_this_day,
        }
    }

    /// 跨过窗口边界的计数器归零
    fn roll(&mut self, now: DateTime<Utc>) {
        for window in UsageWindow::CHECK_ORDER {
            let start = window_start(now, window);
            let counter = self.counter_mut(window);
            if start > counter.window_start {
                counter.value = 0;
                counter.window_start = start;
            }
        }
    }

    /// 本次请求还需要占用的额度（不含已计数部分）
    fn demand(&self, window: UsageWindow, estimated_words: u64) -> u64 {
        match window {
            UsageWindow::RequestsPerMinute => 1,
            UsageWindow::EssaysPerHour | UsageWindow::EssaysPerDay => self.pending_essays + 1,
            UsageWindow::WordsPerDay => self.pending_words + estimated_words,
        }
    }

    fn exceeds(&self, window: UsageWindow, limits: &UsageLimits, estimated_words: u64) -> bool {
        let used = self.counter(window).value;
        used.saturating_add(self.demand(window, estimated_words)) > limits.ceiling(window)
    }

    fn deny(&self, window: UsageWindow) -> QuotaExceeded {
        QuotaExceeded {
            window,
            resets_at: self.counter(window).window_start + window.span(),
        }
    }

    /// 按固定顺序找出第一个超限窗口
    fn first_violation(
        &self,
        windows: &[UsageWindow],
        limits: &UsageLimits,
        estimated_words: u64,
    ) -> Option<QuotaExceeded> {
        windows
            .iter()
            .find(|window| self.exceeds(**window, limits, estimated_words))
            .map(|window| self.deny(*window))
    }
}

/// 内存实现
pub struct InMemoryUsageGuard {
    clock: Arc<dyn Clock>,
    limits: UsageLimits,
    state: Arc<Mutex<UsageState>>,
}

impl InMemoryUsageGuard {
    pub fn new(clock: Arc<dyn Clock>, limits: UsageLimits) -> Self {
        let state = UsageState::new(clock.now());
        Self {
            clock,
            limits,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn limits(&self) -> &UsageLimits {
        &self.limits
    }

    fn lock(&self) -> MutexGuard<'_, UsageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for InMemoryUsageGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryUsageGuard")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl UsageGuard for InMemoryUsageGuard {
    fn check(&self, estimated_words: u64) -> Result<(), QuotaExceeded> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll(now);
        match state.first_violation(&UsageWindow::CHECK_ORDER, &self.limits, estimated_words) {
            Some(denied) => Err(denied),
            None => Ok(()),
        }
    }

    fn admit(&self) -> Result<(), QuotaExceeded> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll(now);

        let request_window = [UsageWindow::RequestsPerMinute];
        if let Some(denied) = state.first_violation(&request_window, &self.limits, 0) {
            warn!("🚦 配额拒绝: {}", denied);
            return Err(denied);
        }
        // 每次尝试都计入请求数，与之后是否成功无关
        state.requests_this_minute.value += 1;
        Ok(())
    }

    fn reserve(&self, estimated_words: u64) -> Result<UsageTicket, QuotaExceeded> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll(now);

        let essay_windows = &UsageWindow::CHECK_ORDER[1..];
        if let Some(denied) = state.first_violation(essay_windows, &self.limits, estimated_words) {
            warn!("🚦 配额拒绝: {}", denied);
            return Err(denied);
        }
        state.pending_essays += 1;
        state.pending_words += estimated_words;
        debug!(
            "额度已预留: {} 词 (进行中 {} 篇)",
            estimated_words, state.pending_essays
        );

        let shared = Arc::clone(&self.state);
        Ok(UsageTicket::new(estimated_words, move || {
            let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
            state.pending_essays = state.pending_essays.saturating_sub(1);
            state.pending_words = state.pending_words.saturating_sub(estimated_words);
            debug!("预留额度已归还: {} 词", estimated_words);
        }))
    }

    fn commit(&self, ticket: UsageTicket, actual_words: u64) {
        let reserved_words = ticket.disarm();
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll(now);

        state.pending_essays = state.pending_essays.saturating_sub(1);
        state.pending_words = state.pending_words.saturating_sub(reserved_words);

        let limits = self.limits;
        state.essays_this_hour.value = (state.essays_this_hour.value + 1).min(limits.essays_per_hour);
        state.essays_this_day.value = (state.essays_this_day.value + 1).min(limits.essays_per_day);

        let words = state.words_this_day.value + actual_words;
        if words > limits.words_per_day {
            warn!(
                "实际字数 {} 超出预留 {}，每日字数计数封顶为 {}",
                actual_words, reserved_words, limits.words_per_day
            );
        }
        state.words_this_day.value = words.min(limits.words_per_day);

        debug!(
            "用量已提交: 本小时 {} 篇, 今日 {} 篇, 今日 {} 词",
            state.essays_this_hour.value, state.essays_this_day.value, state.words_this_day.value
        );
    }

    fn summary(&self) -> UsageSummary {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll(now);
        let limits = &self.limits;

        let remaining = |window: UsageWindow, pending: u64| {
            limits
                .ceiling(window)
                .saturating_sub(state.counter(window).value + pending)
        };

        UsageSummary {
            essays_remaining_today: remaining(UsageWindow::EssaysPerDay, state.pending_essays),
            words_remaining_today: remaining(UsageWindow::WordsPerDay, state.pending_words),
            requests_remaining_this_minute: remaining(UsageWindow::RequestsPerMinute, 0),
            essays_remaining_this_hour: remaining(UsageWindow::EssaysPerHour, state.pending_essays),
            next_reset: NextResets {
                requests_per_minute: next_reset(now, UsageWindow::RequestsPerMinute),
                essays_per_hour: next_reset(now, UsageWindow::EssaysPerHour),
                essays_per_day: next_reset(now, UsageWindow::EssaysPerDay),
                words_per_day: next_reset(now, UsageWindow::WordsPerDay),
            },
        }
    }
}
