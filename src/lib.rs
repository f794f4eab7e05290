// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 流水线配置参数
pub mod detection; // 身份跟踪与实体存储
pub mod error; // 错误类型
pub mod pipeline; // 帧调度与自适应节流

pub use crate::config::PipelineConfig;
pub use crate::detection::{
    compute_iou, BBox, Detections, Detector, Dimensions, EntityStore, Frame, FrameResult,
    FrameSource, IdentityTracker, RawDetection, Smoother, TrackedEntity,
};
pub use crate::error::{Error, Result};
pub use crate::pipeline::{
    CollectingSink, EventSink, FrameScheduler, PipelineEvent, SchedulerState, SchedulerStats,
    SchedulerStatus,
};
