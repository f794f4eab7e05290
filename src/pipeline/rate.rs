//! 自适应节流
//! Latency-feedback control of polling interval and frame skip

use serde::Serialize;

use crate::config::PipelineConfig;

// 放大阈值与缩小阈值分开 (滞回带),避免速率来回抖动
const SKIP_UP_RATIO: f64 = 0.8;
const INTERVAL_UP_RATIO: f64 = 1.5;
const SKIP_DOWN_RATIO: f64 = 0.3;
const INTERVAL_DOWN_RATIO: f64 = 0.2;
const INTERVAL_GROWTH: f64 = 1.2;
const INTERVAL_DECAY: f64 = 0.8;

/// 调度状态
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    pub current_interval_ms: f64,
    pub frame_skip_target: u32,
    pub frame_skip_counter: u32,
    pub last_processing_time_ms: u64,
    pub running: bool,
}

impl SchedulerState {
    pub fn new(base_interval_ms: u64) -> Self {
        Self {
            current_interval_ms: base_interval_ms as f64,
            frame_skip_target: 0,
            frame_skip_counter: 0,
            last_processing_time_ms: 0,
            running: false,
        }
    }
}

/// 延迟反馈控制器 (启发式,非PID)
#[derive(Clone, Debug)]
pub struct AdaptiveRateController {
    enabled: bool,
    base_interval_ms: f64,
    max_interval_ms: f64,
    max_frame_skip: u32,
}

impl AdaptiveRateController {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            enabled: config.adaptive_processing,
            base_interval_ms: config.base_processing_interval_ms as f64,
            max_interval_ms: config.max_interval_ms as f64,
            max_frame_skip: config.max_frame_skip,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 根据本帧处理耗时调整跳帧数与轮询间隔; 返回是否有变化
    pub fn adjust(&self, processing_time_ms: u64, state: &mut SchedulerState) -> bool {
        state.last_processing_time_ms = processing_time_ms;
        if !self.enabled {
            return false;
        }

        let t = processing_time_ms as f64;
        let interval = state.current_interval_ms;
        let before = (state.frame_skip_target, state.current_interval_ms);

        if t > SKIP_UP_RATIO * interval {
            state.frame_skip_target = (state.frame_skip_target + 1).min(self.max_frame_skip);
            if t > INTERVAL_UP_RATIO * interval {
                state.current_interval_ms = (interval * INTERVAL_GROWTH).min(self.max_interval_ms);
            }
        } else if t < SKIP_DOWN_RATIO * interval && state.frame_skip_target > 0 {
            state.frame_skip_target = state.frame_skip_target.saturating_sub(1);
            if t < INTERVAL_DOWN_RATIO * interval && interval > self.base_interval_ms {
                state.current_interval_ms = (interval * INTERVAL_DECAY).max(self.base_interval_ms);
            }
        }

        let changed = before != (state.frame_skip_target, state.current_interval_ms);
        if changed {
            tracing::debug!(
                processing_ms = processing_time_ms,
                skip = state.frame_skip_target,
                interval_ms = state.current_interval_ms,
                "⚙️ 调整处理速率"
            );
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AdaptiveRateController {
        AdaptiveRateController::new(&PipelineConfig::default())
    }

    #[test]
    fn moderate_overload_only_adds_skip() {
        let c = controller();
        let mut s = SchedulerState::new(100);
        assert!(c.adjust(90, &mut s));
        assert_eq!(s.frame_skip_target, 1);
        assert_eq!(s.current_interval_ms, 100.0);
        assert_eq!(s.last_processing_time_ms, 90);
    }

    #[test]
    fn heavy_overload_grows_interval() {
        let c = controller();
        let mut s = SchedulerState::new(100);
        c.adjust(160, &mut s);
        assert_eq!(s.frame_skip_target, 1);
        assert!((s.current_interval_ms - 120.0).abs() < 1e-9);
    }

    #[test]
    fn caps_at_max_skip_and_interval() {
        let c = controller();
        let mut s = SchedulerState::new(100);
        for _ in 0..50 {
            c.adjust(10_000, &mut s);
        }
        assert_eq!(s.frame_skip_target, 5);
        assert_eq!(s.current_interval_ms, 500.0);
    }

    #[test]
    fn middle_band_is_stable() {
        let c = controller();
        let mut s = SchedulerState::new(100);
        s.frame_skip_target = 2;
        s.current_interval_ms = 200.0;
        // 0.3× ≤ t ≤ 0.8×: 不变
        assert!(!c.adjust(60, &mut s));
        assert!(!c.adjust(160, &mut s));
        assert_eq!(s.frame_skip_target, 2);
        assert_eq!(s.current_interval_ms, 200.0);
    }

    #[test]
    fn light_load_recovers_toward_base() {
        let c = controller();
        let mut s = SchedulerState::new(100);
        s.frame_skip_target = 2;
        s.current_interval_ms = 200.0;

        // 0.2× ≤ t < 0.3×: 只减跳帧
        c.adjust(50, &mut s);
        assert_eq!(s.frame_skip_target, 1);
        assert_eq!(s.current_interval_ms, 200.0);

        // t < 0.2×: 同时缩小间隔
        c.adjust(10, &mut s);
        assert_eq!(s.frame_skip_target, 0);
        assert!((s.current_interval_ms - 160.0).abs() < 1e-9);

        // 跳帧已为0时不再缩小间隔
        c.adjust(1, &mut s);
        assert!((s.current_interval_ms - 160.0).abs() < 1e-9);
    }

    #[test]
    fn interval_never_drops_below_base() {
        let c = controller();
        let mut s = SchedulerState::new(100);
        s.frame_skip_target = 3;
        s.current_interval_ms = 110.0;
        c.adjust(0, &mut s);
        assert_eq!(s.current_interval_ms, 100.0);
    }

    #[test]
    fn disabled_controller_records_latency_only() {
        let config = PipelineConfig {
            adaptive_processing: false,
            ..PipelineConfig::default()
        };
        let c = AdaptiveRateController::new(&config);
        let mut s = SchedulerState::new(100);
        assert!(!c.adjust(1_000, &mut s));
        assert_eq!(s.frame_skip_target, 0);
        assert_eq!(s.last_processing_time_ms, 1_000);
    }
}
