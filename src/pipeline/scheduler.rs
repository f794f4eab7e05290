//! 帧调度器 (FrameScheduler)
//! 职责: 轮询检测器 → 身份跟踪 → 自适应节流 → 发布事件 → 重新调度
//!
//! 状态机: Idle → Running ⇄ Paused → Stopped (终态)
//!
//! 同一时刻最多一次检测在途; 下一次 tick 只在当前 tick (含检测) 完成后调度。
//! 跟踪/存储/节流逻辑都在锁内同步执行,检测调用与事件发布期间不持锁。
//! 每次状态切换递增 generation,在途检测返回后先核对 generation 再写状态,
//! 因此 `pause()`/`stop()` 返回后不会再有旧 tick 修改实体存储。

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::clock::{Clock, TokioClock};
use super::rate::{AdaptiveRateController, SchedulerState};
use super::{EntitiesPayload, ErrorPayload, EventSink, LifecyclePayload, PipelineEvent};
use crate::config::PipelineConfig;
use crate::detection::detector::{Detector, FrameSource};
use crate::detection::store::EntityStore;
use crate::detection::tracker::{IdentityTracker, Smoother};
use crate::detection::types::{Detections, Frame, FrameResult, RawDetection, TrackedEntity};
use crate::error::{Error, Result};

/// 调度器状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerStatus {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// 运行统计
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub detector_failures: u64,
    pub detections_dropped: u64,
    pub entities_created: u64,
    pub entities_lost: u64,
    pub processing_fps: f64,
}

/// 锁内共享状态
struct Shared {
    status: SchedulerStatus,
    generation: u64,
    state: SchedulerState,
    tracker: IdentityTracker,
    store: EntityStore,
    detector: Option<Arc<dyn Detector>>,
    source: Option<Box<dyn FrameSource>>,
    stats: SchedulerStats,
    last_result: Option<FrameResult>,

    // FPS统计
    fps_count: u64,
    fps_window_start: u64,
}

struct Inner {
    config: Arc<PipelineConfig>,
    controller: AdaptiveRateController,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    shared: Mutex<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
    runtime: Mutex<Option<Handle>>,
}

/// tick 第一阶段的结果
enum Step {
    Detect(Arc<dyn Detector>, Frame),
    Reschedule(u64),
}

/// 检测任务守卫: 丢弃时中止在途检测
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// 帧调度器
///
/// 每条流水线 (人脸/眼部) 各自持有一个实例,实例之间不共享状态。
pub struct FrameScheduler {
    inner: Arc<Inner>,
}

impl FrameScheduler {
    /// 使用 tokio 时钟创建
    pub fn new(
        config: PipelineConfig,
        detector: Arc<dyn Detector>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        Self::with_clock(config, detector, sink, Arc::new(TokioClock::new()))
    }

    /// 注入时钟创建
    pub fn with_clock(
        config: PipelineConfig,
        detector: Arc<dyn Detector>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let smoother = Smoother::new(config.smoothing_factor, config.enable_smoothing);
        let now = clock.now_ms();
        let shared = Shared {
            status: SchedulerStatus::Idle,
            generation: 0,
            state: SchedulerState::new(config.base_processing_interval_ms),
            tracker: IdentityTracker::new(config.tracking_iou_threshold),
            store: EntityStore::new(smoother),
            detector: Some(detector),
            source: None,
            stats: SchedulerStats::default(),
            last_result: None,
            fps_count: 0,
            fps_window_start: now,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                controller: AdaptiveRateController::new(&config),
                config: Arc::new(config),
                clock,
                sink,
                shared: Mutex::new(shared),
                task: Mutex::new(None),
                runtime: Mutex::new(None),
            }),
        })
    }

    // ========== 生命周期 ==========

    /// 启动: 等待检测器就绪,重置调度状态并开始 tick
    ///
    /// 仅 Idle/Paused 可启动。检测器未就绪时返回错误且保持原状态。
    pub async fn start(&self, source: Box<dyn FrameSource>) -> Result<()> {
        let detector = {
            let shared = self.inner.lock();
            Self::check_startable(shared.status)?;
            shared.detector.clone().ok_or(Error::Stopped)?
        };

        let timeout = Duration::from_millis(self.inner.config.detector_timeout_ms);
        let ready = match tokio::time::timeout(timeout, detector.ready()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::DetectorNotReady(e.to_string())),
            Err(_) => Err(Error::DetectorNotReady(format!(
                "{} not ready within {}ms",
                detector.name(),
                self.inner.config.detector_timeout_ms
            ))),
        };
        if let Err(e) = ready {
            tracing::error!(pipeline = %self.inner.config.name, error = %e, "❌ 检测器启动失败");
            return Err(e);
        }

        let generation = {
            let mut shared = self.inner.lock();
            Self::check_startable(shared.status)?;

            shared.generation += 1;
            shared.state = SchedulerState::new(self.inner.config.base_processing_interval_ms);
            shared.state.running = true;
            shared.status = SchedulerStatus::Running;
            shared.source = Some(source);
            shared.fps_count = 0;
            shared.fps_window_start = self.inner.clock.now_ms();
            shared.generation
        };
        self.inner
            .sink
            .emit(&PipelineEvent::ProcessingStarted(self.inner.lifecycle()));

        tracing::info!(
            pipeline = %self.inner.config.name,
            detector = detector.name(),
            interval_ms = self.inner.config.base_processing_interval_ms,
            "🚀 调度器启动"
        );

        let handle = Handle::current();
        *self.inner.runtime.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
        self.spawn_loop(&handle, generation);
        Ok(())
    }

    /// 暂停: 取消待执行的 tick,保留调度状态与实体
    pub fn pause(&self) -> bool {
        {
            let mut shared = self.inner.lock();
            if shared.status != SchedulerStatus::Running {
                return false;
            }
            shared.generation += 1;
            shared.status = SchedulerStatus::Paused;
            shared.state.running = false;
        }
        self.abort_task();
        self.inner
            .sink
            .emit(&PipelineEvent::ProcessingPaused(self.inner.lifecycle()));
        tracing::info!(pipeline = %self.inner.config.name, "⏸️ 调度器暂停");
        true
    }

    /// 恢复: 沿用暂停前的间隔与跳帧状态
    pub fn resume(&self) -> bool {
        let handle = match self
            .inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(handle) => handle,
            None => return false,
        };

        let generation = {
            let mut shared = self.inner.lock();
            if shared.status != SchedulerStatus::Paused {
                return false;
            }
            shared.generation += 1;
            shared.status = SchedulerStatus::Running;
            shared.state.running = true;
            shared.generation
        };

        self.inner
            .sink
            .emit(&PipelineEvent::ProcessingResumed(self.inner.lifecycle()));
        self.spawn_loop(&handle, generation);
        tracing::info!(pipeline = %self.inner.config.name, "▶️ 调度器恢复");
        true
    }

    /// 停止 (终态): 返回后不会再有 tick 执行,并释放帧源与检测器
    pub fn stop(&self) -> bool {
        {
            let mut shared = self.inner.lock();
            if shared.status == SchedulerStatus::Stopped {
                return false;
            }
            shared.generation += 1;
            shared.status = SchedulerStatus::Stopped;
            shared.state.running = false;
            shared.source = None;
            shared.detector = None;
        }
        self.abort_task();
        *self.inner.runtime.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.inner
            .sink
            .emit(&PipelineEvent::ProcessingStopped(self.inner.lifecycle()));
        tracing::info!(pipeline = %self.inner.config.name, "🛑 调度器停止");
        true
    }

    // ========== 查询 ==========

    pub fn status(&self) -> SchedulerStatus {
        self.inner.lock().status
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state.clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.lock().stats.clone()
    }

    /// 全部存活实体 (含本帧未出现但仍在持久窗口内的)
    pub fn entities(&self) -> Vec<TrackedEntity> {
        self.inner.lock().store.all()
    }

    pub fn last_result(&self) -> Option<FrameResult> {
        self.inner.lock().last_result.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    // ========== 内部 ==========

    fn check_startable(status: SchedulerStatus) -> Result<()> {
        match status {
            SchedulerStatus::Idle | SchedulerStatus::Paused => Ok(()),
            SchedulerStatus::Running => Err(Error::AlreadyRunning),
            SchedulerStatus::Stopped => Err(Error::Stopped),
        }
    }

    fn spawn_loop(&self, handle: &Handle, generation: u64) {
        let inner = self.inner.clone();
        let task = handle.spawn(async move { inner.run(generation).await });
        let previous = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn abort_task(&self) {
        if let Some(task) = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        // 从未启动: 没有任务可停,也不发布 processing:stopped
        if self.status() == SchedulerStatus::Idle {
            return;
        }
        self.stop();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle(&self) -> LifecyclePayload {
        LifecyclePayload {
            pipeline: self.config.name.clone(),
            timestamp: self.clock.now_ms(),
        }
    }

    /// 调度循环; generation 失效时退出
    async fn run(self: Arc<Self>, generation: u64) {
        let mut delay = 0;
        loop {
            if delay > 0 {
                self.clock.sleep_ms(delay).await;
            }
            match self.tick(generation).await {
                Some(next) => delay = next,
                None => break,
            }
        }
        tracing::debug!(pipeline = %self.config.name, generation, "调度循环退出");
    }

    /// 单次 tick,返回下一次延迟 (ms); None 表示已取消
    ///
    /// 事件先在锁内收集,释放锁后再发布,监听者可以回调调度器。
    async fn tick(&self, generation: u64) -> Option<u64> {
        // 1. 跳帧判断 + 取帧 (锁内)
        let mut outbox = Vec::new();
        let step = self.begin(generation, &mut outbox);
        self.publish(outbox);
        let (detector, frame) = match step? {
            Step::Detect(detector, frame) => (detector, frame),
            Step::Reschedule(next) => return Some(next),
        };

        // 2. 检测 (不持锁,独立任务中执行以隔离 panic)
        let started = self.clock.now_ms();
        let config = self.config.clone();
        let mut job = AbortOnDrop(tokio::spawn(async move {
            detector.detect(&frame, &config).await
        }));
        let timeout = Duration::from_millis(self.config.detector_timeout_ms);
        let outcome = match tokio::time::timeout(timeout, &mut job.0).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(Error::Detector(format!("detector task failed: {}", join_error))),
            Err(_) => Err(Error::DetectorTimeout(self.config.detector_timeout_ms)),
        };
        drop(job);

        // 3. 跟踪 + 节流 (锁内,先核对 generation),然后发布
        let mut outbox = Vec::new();
        let next = self.finish(generation, outcome, started, &mut outbox);
        self.publish(outbox);
        next
    }

    fn begin(&self, generation: u64, outbox: &mut Vec<PipelineEvent>) -> Option<Step> {
        let mut shared = self.lock();
        if shared.generation != generation || shared.status != SchedulerStatus::Running {
            return None;
        }
        let now = self.clock.now_ms();

        if shared.state.frame_skip_counter < shared.state.frame_skip_target {
            shared.state.frame_skip_counter += 1;
            shared.stats.frames_skipped += 1;
            self.sweep(&mut shared, now, outbox);
            return Some(Step::Reschedule(interval_delay(shared.state.current_interval_ms)));
        }
        shared.state.frame_skip_counter = 0;

        let detector = shared.detector.clone()?;
        let captured = shared.source.as_mut()?.capture();
        match captured {
            Ok(frame) => Some(Step::Detect(detector, frame)),
            Err(e) => {
                self.fail(&mut shared, "Frame capture failed", &e, now, outbox);
                Some(Step::Reschedule(interval_delay(shared.state.current_interval_ms)))
            }
        }
    }

    fn finish(
        &self,
        generation: u64,
        outcome: Result<Detections>,
        started: u64,
        outbox: &mut Vec<PipelineEvent>,
    ) -> Option<u64> {
        let mut shared = self.lock();
        if shared.generation != generation {
            tracing::debug!(pipeline = %self.config.name, "丢弃已取消 tick 的检测结果");
            return None;
        }
        let now = self.clock.now_ms();
        let elapsed = now.saturating_sub(started);

        match outcome {
            Ok(detections) => {
                self.process(&mut shared, detections, elapsed, now, outbox);
                self.controller.adjust(elapsed, &mut shared.state);
                let next = (shared.state.current_interval_ms - elapsed as f64).max(1.0);
                Some(next.round() as u64)
            }
            Err(e) => {
                // 失败不计入延迟反馈,间隔保持不变
                self.fail(&mut shared, "Detection failed", &e, now, outbox);
                Some(interval_delay(shared.state.current_interval_ms))
            }
        }
    }

    fn publish(&self, events: Vec<PipelineEvent>) {
        for event in &events {
            self.sink.emit(event);
        }
    }

    /// 处理一帧检测结果
    fn process(
        &self,
        shared: &mut Shared,
        detections: Detections,
        elapsed: u64,
        now: u64,
        outbox: &mut Vec<PipelineEvent>,
    ) {
        let total = detections.entities.len();
        let (well_formed, malformed): (Vec<RawDetection>, Vec<RawDetection>) = detections
            .entities
            .into_iter()
            .partition(RawDetection::is_well_formed);
        if !malformed.is_empty() {
            tracing::warn!(pipeline = %self.config.name, count = malformed.len(), "⚠️ 丢弃无效检测框");
        }
        let accepted: Vec<RawDetection> = well_formed
            .into_iter()
            .filter(|d| d.score >= self.config.min_confidence)
            .collect();
        let dropped = total - accepted.len();
        if dropped > 0 {
            shared.stats.detections_dropped += dropped as u64;
            tracing::trace!(pipeline = %self.config.name, dropped, "过滤无效/低置信度检测");
        }

        // 候选为全部存活实体 (ID升序),短暂漏检后仍可认回原ID
        let previous = shared.store.all();
        let tracked = shared
            .tracker
            .update(&accepted, &previous, &mut shared.store, now);

        let ids: Vec<u64> = tracked.iter().map(|t| t.id).collect();
        let created = tracked.iter().filter(|t| t.is_new).count();
        let entities = shared.store.snapshot(&ids);

        shared.stats.frames_processed += 1;
        shared.stats.entities_created += created as u64;
        self.update_fps(shared, now);

        let payload = EntitiesPayload {
            count: entities.len(),
            entities: entities.clone(),
            dimensions: detections.dimensions,
            timestamp: now,
            processing_time_ms: elapsed,
        };
        outbox.push(if created > 0 {
            PipelineEvent::EntityDetected(payload)
        } else {
            PipelineEvent::EntityUpdated(payload)
        });

        self.sweep(shared, now, outbox);

        shared.last_result = Some(FrameResult {
            timestamp: now,
            processing_time_ms: elapsed,
            entities,
            dimensions: detections.dimensions,
        });
    }

    /// 淘汰过期实体,每个实体一条 entity:lost
    fn sweep(&self, shared: &mut Shared, now: u64, outbox: &mut Vec<PipelineEvent>) {
        let lost = shared
            .store
            .sweep_expired(now, self.config.persistence_window_ms);
        shared.stats.entities_lost += lost.len() as u64;
        for entity in lost {
            tracing::debug!(
                pipeline = %self.config.name,
                id = entity.id,
                detections = entity.detection_count,
                "👋 实体丢失"
            );
            outbox.push(PipelineEvent::EntityLost(entity));
        }
    }

    /// 失败路径: 记录错误,仍执行淘汰
    fn fail(
        &self,
        shared: &mut Shared,
        message: &str,
        error: &Error,
        now: u64,
        outbox: &mut Vec<PipelineEvent>,
    ) {
        shared.stats.detector_failures += 1;
        tracing::error!(pipeline = %self.config.name, error = %error, "❌ {}", message);
        outbox.push(PipelineEvent::ProcessingError(ErrorPayload {
            message: message.to_string(),
            error: error.to_string(),
        }));
        self.sweep(shared, now, outbox);
    }

    fn update_fps(&self, shared: &mut Shared, now: u64) {
        shared.fps_count += 1;
        let window = now.saturating_sub(shared.fps_window_start);
        if window >= 1_000 {
            shared.stats.processing_fps = shared.fps_count as f64 * 1_000.0 / window as f64;
            shared.fps_count = 0;
            shared.fps_window_start = now;
        }
    }
}

fn interval_delay(interval_ms: f64) -> u64 {
    interval_ms.max(1.0).round() as u64
}
