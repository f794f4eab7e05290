//! 流水线配置 - 通过JSON文件调整参数
//! Pipeline configuration (JSON, camelCase keys)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// 跟踪流水线参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// 流水线名称 (face / eye),用于日志
    pub name: String,

    // === 检测参数 ===
    pub min_confidence: f32, // 最低置信度,低于此值的检测直接丢弃

    // === 平滑参数 ===
    pub enable_smoothing: bool, // 是否启用EMA平滑
    pub smoothing_factor: f32,  // α: 旧值权重 [0,1]

    // === 跟踪参数 ===
    #[serde(rename = "trackingIoUThreshold")]
    pub tracking_iou_threshold: f32, // 匹配需要 IoU 严格大于此值
    pub persistence_window_ms: u64,  // 超过此时长未见则淘汰

    // === 调度参数 ===
    pub base_processing_interval_ms: u64, // 基础轮询间隔
    pub adaptive_processing: bool,        // 是否根据延迟自适应
    pub max_frame_skip: u32,              // 最大跳帧数
    pub max_interval_ms: u64,             // 最大轮询间隔
    pub detector_timeout_ms: u64,         // 检测器超时 (超时视为失败)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "face".to_string(),

            min_confidence: 0.5,

            enable_smoothing: true,
            smoothing_factor: 0.5,

            tracking_iou_threshold: 0.6,
            persistence_window_ms: 10_000,

            base_processing_interval_ms: 100,
            adaptive_processing: true,
            max_frame_skip: 5,
            max_interval_ms: 500,
            detector_timeout_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    /// 人脸流水线预设
    pub fn face() -> Self {
        Self::default()
    }

    /// 眼部流水线预设: 目标更小,IoU 抖动更大,丢失判定更快
    pub fn eye() -> Self {
        Self {
            name: "eye".to_string(),
            tracking_iou_threshold: 0.4,
            persistence_window_ms: 2_000,
            base_processing_interval_ms: 50,
            max_interval_ms: 250,
            ..Self::default()
        }
    }

    /// 从JSON文件加载配置 (缺省字段取默认值)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        tracing::info!(path = %path.as_ref().display(), "✅ 配置已加载");
        Ok(config)
    }

    /// 加载配置,文件不存在时写入默认配置
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        tracing::info!(path = %path.display(), "📝 配置文件不存在,创建默认配置");
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        tracing::info!(path = %path.as_ref().display(), "💾 配置已保存");
        Ok(())
    }

    /// 参数范围校验
    pub fn validate(&self) -> Result<()> {
        fn unit(name: &str, v: f32) -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::Config(format!("{} must be within [0, 1], got {}", name, v)))
            }
        }

        unit("minConfidence", self.min_confidence)?;
        unit("smoothingFactor", self.smoothing_factor)?;
        unit("trackingIoUThreshold", self.tracking_iou_threshold)?;

        if self.base_processing_interval_ms == 0 {
            return Err(Error::Config(
                "baseProcessingIntervalMs must be positive".to_string(),
            ));
        }
        if self.max_interval_ms < self.base_processing_interval_ms {
            return Err(Error::Config(format!(
                "maxIntervalMs ({}) is below baseProcessingIntervalMs ({})",
                self.max_interval_ms, self.base_processing_interval_ms
            )));
        }
        if self.detector_timeout_ms == 0 {
            return Err(Error::Config("detectorTimeoutMs must be positive".to_string()));
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        tracing::info!(
            pipeline = %self.name,
            min_confidence = self.min_confidence,
            smoothing = self.enable_smoothing,
            smoothing_factor = self.smoothing_factor,
            iou_threshold = self.tracking_iou_threshold,
            persistence_ms = self.persistence_window_ms,
            base_interval_ms = self.base_processing_interval_ms,
            adaptive = self.adaptive_processing,
            "🎛️  当前流水线配置"
        );
    }
}
