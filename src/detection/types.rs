use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
/// 检测与跟踪数据结构定义
/// Data structures for detection and tracking

// ========== 几何 ==========

/// 边界框 (左上角 + 宽高)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn x2(&self) -> f32 {
        self.x + self.width
    }

    pub fn y2(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// 获取中心点
    pub fn center(&self) -> TrackPoint {
        TrackPoint {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    /// 坐标有限且宽高为正
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    /// 平移 (用于仿真/测试)
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// 跟踪点 (中心点 / 速度)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub x: f32,
    pub y: f32,
}

/// 帧尺寸
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

// ========== 检测器输入输出 ==========

/// 视频帧 (帧源 → 检测器)
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba_data: Arc<Vec<u8>>, // 使用Arc共享数据,避免复制
    pub width: u32,
    pub height: u32,
    pub frame_id: u64, // 帧序号
}

impl Frame {
    /// 无像素数据的空帧 (合成检测器使用)
    pub fn empty(width: u32, height: u32, frame_id: u64) -> Self {
        Self {
            rgba_data: Arc::new(Vec::new()),
            width,
            height,
            frame_id,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }
}

/// 原始检测 (每帧由检测器重新生成,不持久化)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(rename = "box")]
    pub bbox: BBox,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
}

impl RawDetection {
    pub fn new(bbox: BBox, score: f32) -> Self {
        Self {
            bbox,
            score,
            attributes: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// 框合法且分数为 [0,1] 内的有限值
    pub fn is_well_formed(&self) -> bool {
        self.bbox.is_valid() && self.score.is_finite() && (0.0..=1.0).contains(&self.score)
    }
}

/// 检测器单帧输出
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Detections {
    pub entities: Vec<RawDetection>,
    pub dimensions: Dimensions,
}

// ========== 跟踪结果 ==========

/// 跟踪实体 (跨帧维持身份)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    /// 唯一跟踪ID (单调递增,不复用)
    pub id: u64,

    /// 当前边界框 (平滑后)
    #[serde(rename = "box")]
    pub bbox: BBox,

    /// 最近一次检测置信度
    pub confidence: f32,

    pub first_seen: u64,
    pub last_seen: u64,
    pub detection_count: u32,

    /// 平滑框中心点
    pub center: TrackPoint,

    /// 每次更新的中心位移
    pub velocity: TrackPoint,

    /// 最近一次的附加属性 (后到覆盖)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
}

impl TrackedEntity {
    /// 存活时长 (ms)
    pub fn age_ms(&self) -> u64 {
        self.last_seen.saturating_sub(self.first_seen)
    }
}

/// 单个检测的跟踪输出: 原始框与平滑框分别给出
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedDetection {
    pub id: u64,
    pub raw_box: BBox,
    pub smoothed_box: BBox,
    pub score: f32,
    pub attributes: Option<Value>,
    /// 本帧新建的身份
    pub is_new: bool,
}

/// 丢失实体摘要 (entity:lost 负载)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LostEntity {
    pub id: u64,
    pub first_seen: u64,
    pub last_seen: u64,
    pub detection_count: u32,
}

impl From<&TrackedEntity> for LostEntity {
    fn from(e: &TrackedEntity) -> Self {
        Self {
            id: e.id,
            first_seen: e.first_seen,
            last_seen: e.last_seen,
            detection_count: e.detection_count,
        }
    }
}

/// 单帧处理结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameResult {
    pub timestamp: u64,
    pub processing_time_ms: u64,
    pub entities: Vec<TrackedEntity>,
    pub dimensions: Dimensions,
}
