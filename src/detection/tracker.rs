//! 多目标身份跟踪
//! IoU-based identity tracking across frames

use super::store::EntityStore;
use super::types::{BBox, RawDetection, TrackedDetection, TrackedEntity};

// ========== 工具函数 ==========

/// 计算两个边界框的IOU (Intersection over Union)
pub fn compute_iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.x2().min(b.x2());
    let y2 = a.y2().min(b.y2());

    // 任一轴无重叠
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.area() + b.area() - intersection;

    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

// ========== EMA平滑器 ==========

/// 指数滑动平均: smoothed = α·stored + (1-α)·incoming
#[derive(Clone, Copy, Debug)]
pub struct Smoother {
    alpha: f32,
    enabled: bool,
}

impl Smoother {
    /// `alpha` 会被限制在 [0,1]
    pub fn new(alpha: f32, enabled: bool) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            enabled,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0.0, false)
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 融合已存储框与新观测框 (四个分量独立处理)
    pub fn apply(&self, stored: &BBox, incoming: &BBox) -> BBox {
        if !self.enabled {
            return *incoming;
        }
        let a = self.alpha;
        let mix = |old: f32, new: f32| a * old + (1.0 - a) * new;
        BBox {
            x: mix(stored.x, incoming.x),
            y: mix(stored.y, incoming.y),
            width: mix(stored.width, incoming.width),
            height: mix(stored.height, incoming.height),
        }
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Self::new(0.5, true)
    }
}

// ========== 身份分配 ==========

/// 单个检测的身份分配结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assignment {
    /// 当前帧检测下标
    pub detection: usize,
    pub id: u64,
    pub is_new: bool,
}

/// 身份跟踪器
///
/// 贪心匹配: 按当前检测顺序扫描,在未被占用的上一帧实体中取 IoU 最大且
/// 严格大于阈值者; 并列时保留先扫描到的实体。未匹配的检测获得新ID。
pub struct IdentityTracker {
    /// 匹配阈值 (严格大于)
    iou_threshold: f32,

    /// 下一个分配的ID
    next_id: u64,
}

impl IdentityTracker {
    pub fn new(iou_threshold: f32) -> Self {
        Self {
            iou_threshold,
            next_id: 1,
        }
    }

    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }

    /// 下一个将被分配的ID
    pub fn peek_next_id(&self) -> u64 {
        self.next_id
    }

    /// 构建 IoU 矩阵: 行 = 当前检测,列 = 上一帧实体
    pub fn overlap_matrix(current: &[RawDetection], previous: &[TrackedEntity]) -> Vec<Vec<f32>> {
        current
            .iter()
            .map(|det| {
                previous
                    .iter()
                    .map(|prev| compute_iou(&det.bbox, &prev.bbox))
                    .collect()
            })
            .collect()
    }

    /// 为当前检测分配身份 (不修改实体存储)
    pub fn assign(&mut self, current: &[RawDetection], previous: &[TrackedEntity]) -> Vec<Assignment> {
        let matrix = Self::overlap_matrix(current, previous);
        let mut claimed = vec![false; previous.len()];
        let mut assignments = Vec::with_capacity(current.len());

        for (det_idx, row) in matrix.iter().enumerate() {
            let mut best: Option<usize> = None;
            let mut best_iou = self.iou_threshold;

            for (prev_idx, &iou) in row.iter().enumerate() {
                if !claimed[prev_idx] && iou > best_iou {
                    best_iou = iou;
                    best = Some(prev_idx);
                }
            }

            let assignment = match best {
                Some(prev_idx) => {
                    claimed[prev_idx] = true;
                    Assignment {
                        detection: det_idx,
                        id: previous[prev_idx].id,
                        is_new: false,
                    }
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    Assignment {
                        detection: det_idx,
                        id,
                        is_new: true,
                    }
                }
            };
            assignments.push(assignment);
        }

        assignments
    }

    /// 匹配 + 写入存储 (平滑与计数由存储完成)
    ///
    /// 上一帧中未被匹配的实体保持不变,淘汰只由存储按时间处理。
    pub fn update(
        &mut self,
        current: &[RawDetection],
        previous: &[TrackedEntity],
        store: &mut EntityStore,
        now: u64,
    ) -> Vec<TrackedDetection> {
        self.assign(current, previous)
            .into_iter()
            .map(|a| store.upsert(&current[a.detection], a.id, now))
            .collect()
    }
}
