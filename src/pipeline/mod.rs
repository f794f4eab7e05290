/// 帧调度流水线 (Frame Scheduling Pipeline)
///
/// 单任务协作式循环:
/// - Scheduler: 轮询检测器、跳帧、重新调度
/// - Rate:      基于处理延迟的自适应节流
/// - Clock:     可注入时钟 (测试使用虚拟时间)
pub mod clock;
pub mod rate;
pub mod scheduler;

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::detection::types::{Dimensions, LostEntity, TrackedEntity};

pub use clock::{Clock, ManualClock, TokioClock};
pub use rate::{AdaptiveRateController, SchedulerState};
pub use scheduler::{FrameScheduler, SchedulerStats, SchedulerStatus};

// ========== 事件定义 ==========

/// 实体结果负载 (entity:detected / entity:updated)
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesPayload {
    pub entities: Vec<TrackedEntity>,
    pub count: usize,
    pub dimensions: Dimensions,
    pub timestamp: u64,
    pub processing_time_ms: u64,
}

/// 错误负载
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
    pub error: String,
}

/// 生命周期负载
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LifecyclePayload {
    pub pipeline: String,
    pub timestamp: u64,
}

/// 流水线事件 (调度器 → 平台其余部分)
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum PipelineEvent {
    #[serde(rename = "entity:detected")]
    EntityDetected(EntitiesPayload),
    #[serde(rename = "entity:updated")]
    EntityUpdated(EntitiesPayload),
    #[serde(rename = "entity:lost")]
    EntityLost(LostEntity),
    #[serde(rename = "processing:error")]
    ProcessingError(ErrorPayload),
    #[serde(rename = "processing:started")]
    ProcessingStarted(LifecyclePayload),
    #[serde(rename = "processing:stopped")]
    ProcessingStopped(LifecyclePayload),
    #[serde(rename = "processing:paused")]
    ProcessingPaused(LifecyclePayload),
    #[serde(rename = "processing:resumed")]
    ProcessingResumed(LifecyclePayload),
}

impl PipelineEvent {
    /// 事件名
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::EntityDetected(_) => "entity:detected",
            PipelineEvent::EntityUpdated(_) => "entity:updated",
            PipelineEvent::EntityLost(_) => "entity:lost",
            PipelineEvent::ProcessingError(_) => "processing:error",
            PipelineEvent::ProcessingStarted(_) => "processing:started",
            PipelineEvent::ProcessingStopped(_) => "processing:stopped",
            PipelineEvent::ProcessingPaused(_) => "processing:paused",
            PipelineEvent::ProcessingResumed(_) => "processing:resumed",
        }
    }
}

// ========== 事件出口 ==========

/// 事件发布接口 (构造时注入)
///
/// 在调度任务中同步调用,调用时不持有调度器内部锁。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

impl<F> EventSink for F
where
    F: Fn(&PipelineEvent) + Send + Sync,
{
    fn emit(&self, event: &PipelineEvent) {
        self(event)
    }
}

/// 通道出口 (调度器 → 消费线程)
impl EventSink for crossbeam_channel::Sender<PipelineEvent> {
    fn emit(&self, event: &PipelineEvent) {
        // 接收端已关闭时丢弃
        let _ = self.send(event.clone());
    }
}

/// 收集全部事件 (测试/回放)
#[derive(Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(PipelineEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// 仅写日志
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::EntityDetected(p) | PipelineEvent::EntityUpdated(p) => {
                tracing::trace!(event = event.name(), count = p.count, "pipeline event");
            }
            PipelineEvent::EntityLost(lost) => {
                tracing::debug!(id = lost.id, detections = lost.detection_count, "entity lost");
            }
            PipelineEvent::ProcessingError(err) => {
                tracing::warn!(message = %err.message, error = %err.error, "processing error");
            }
            _ => tracing::info!(event = event.name(), "pipeline event"),
        }
    }
}
