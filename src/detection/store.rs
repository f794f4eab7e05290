//! 实体存储: 身份 → 跟踪状态
//! Entity lifecycle (create / update / expire)

use std::collections::BTreeMap;

use super::tracker::Smoother;
use super::types::{LostEntity, RawDetection, TrackPoint, TrackedDetection, TrackedEntity};

/// 跟踪实体存储
///
/// 按ID升序保存 (ID单调递增,即创建顺序)。
pub struct EntityStore {
    entities: BTreeMap<u64, TrackedEntity>,
    smoother: Smoother,
}

impl EntityStore {
    pub fn new(smoother: Smoother) -> Self {
        Self {
            entities: BTreeMap::new(),
            smoother,
        }
    }

    /// 写入一次观测
    ///
    /// 新ID: 原样保存检测框。已有ID: 计数+1,平滑后的框写回存储并作为输出返回。
    pub fn upsert(&mut self, detection: &RawDetection, id: u64, now: u64) -> TrackedDetection {
        match self.entities.get_mut(&id) {
            Some(entity) => {
                let smoothed = self.smoother.apply(&entity.bbox, &detection.bbox);
                let center = smoothed.center();

                entity.velocity = TrackPoint {
                    x: center.x - entity.center.x,
                    y: center.y - entity.center.y,
                };
                entity.center = center;
                entity.bbox = smoothed;
                entity.detection_count += 1;
                entity.last_seen = now;
                entity.confidence = detection.score;
                if let Some(attrs) = &detection.attributes {
                    entity.attributes = Some(attrs.clone());
                }

                TrackedDetection {
                    id,
                    raw_box: detection.bbox,
                    smoothed_box: smoothed,
                    score: detection.score,
                    attributes: entity.attributes.clone(),
                    is_new: false,
                }
            }
            None => {
                let entity = TrackedEntity {
                    id,
                    bbox: detection.bbox,
                    confidence: detection.score,
                    first_seen: now,
                    last_seen: now,
                    detection_count: 1,
                    center: detection.bbox.center(),
                    velocity: TrackPoint::default(),
                    attributes: detection.attributes.clone(),
                };
                self.entities.insert(id, entity);

                TrackedDetection {
                    id,
                    raw_box: detection.bbox,
                    smoothed_box: detection.bbox,
                    score: detection.score,
                    attributes: detection.attributes.clone(),
                    is_new: true,
                }
            }
        }
    }

    /// 淘汰超过持久窗口未见的实体 (`now - last_seen > window`)
    ///
    /// 每个实体只会被返回一次,随后即从存储移除。
    pub fn sweep_expired(&mut self, now: u64, persistence_window_ms: u64) -> Vec<LostEntity> {
        let expired: Vec<u64> = self
            .entities
            .values()
            .filter(|e| now.saturating_sub(e.last_seen) > persistence_window_ms)
            .map(|e| e.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.entities.remove(&id))
            .map(|e| LostEntity::from(&e))
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<&TrackedEntity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entities.contains_key(&id)
    }

    /// 按给定ID顺序取快照 (跳过已不存在的ID)
    pub fn snapshot(&self, ids: &[u64]) -> Vec<TrackedEntity> {
        ids.iter()
            .filter_map(|id| self.entities.get(id).cloned())
            .collect()
    }

    /// 全部存活实体
    pub fn all(&self) -> Vec<TrackedEntity> {
        self.entities.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}
