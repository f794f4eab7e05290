//! 可注入时钟
//! 时间戳与定时都经由此接口,测试可使用虚拟时间

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    /// 当前时间 (毫秒)
    fn now_ms(&self) -> u64;

    /// 等待指定毫秒
    async fn sleep_ms(&self, ms: u64);
}

/// tokio 时钟: 以墙钟毫秒为起点,单调推进
///
/// 基于 `tokio::time::Instant`,在 `start_paused` 测试中随虚拟时间推进。
pub struct TokioClock {
    origin: tokio::time::Instant,
    epoch_ms: u64,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::with_epoch(chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    /// 指定起始时间戳
    pub fn with_epoch(epoch_ms: u64) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            epoch_ms,
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as u64
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// 手动时钟: `sleep_ms` 直接推进时间
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
        tokio::task::yield_now().await;
    }
}
