/// 检测跟踪系统 (Detection & Tracking)
///
/// 与具体模型无关的跟踪外壳:
/// - Detector: 外部检测器接口
/// - Tracker:  IoU 身份匹配 + EMA 平滑
/// - Store:    实体生命周期
pub mod detector;
pub mod store;
pub mod tracker;
pub mod types;

pub use detector::{BlankSource, ChannelSource, Detector, FrameSource};
pub use store::EntityStore;
pub use tracker::{compute_iou, Assignment, IdentityTracker, Smoother};
pub use types::{
    BBox, Detections, Dimensions, Frame, FrameResult, LostEntity, RawDetection, TrackPoint,
    TrackedDetection, TrackedEntity,
};
