//! 事件时间戳来源
//!
//! 流水线在分配序列号时向时钟取时间。任何 `Fn() -> Timestamp` 闭包都可以充当时钟，
//! 测试里用它固定时间。

use domain::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// 系统 UTC 时间
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> Timestamp + Send + Sync,
{
    fn now(&self) -> Timestamp {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[test]
    fn closure_acts_as_clock() {
        let fixed = chrono::Utc.with_ymd_and_hms(2024, 11, 24, 12, 34, 0).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(move || fixed);
        assert_eq!(clock.now(), fixed);
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn system_clock_moves_forward() {
        let before = chrono::Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
    }
}
