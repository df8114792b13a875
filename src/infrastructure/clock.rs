//! 时钟 - 基础设施层
//!
//! 所有与"现在几点"相关的判断（文档过期、配额窗口重置）都通过 `Clock` 获取时间，
//! 生产环境使用系统时钟，测试中使用可手动推进的 `ManualClock`。

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::Mutex;

/// 墙上时钟
pub trait Clock: Send + Sync + fmt::Debug {
    /// 当前 UTC 时间
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟
///
/// 时间只在调用 `advance` / `set` 时变化，用于确定性地测试窗口边界和过期逻辑。
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// 以指定时间创建
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// 向前推进时间
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    /// 直接设置当前时间
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
