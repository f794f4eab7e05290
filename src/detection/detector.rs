//! 检测器与帧源接口
//! 调度器只依赖这两个接口,具体模型 (人脸/眼部) 由调用方提供

use async_trait::async_trait;
use crossbeam_channel::Receiver;

use super::types::{Detections, Frame};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};

/// 外部检测器: 帧 → 原始检测框
#[async_trait]
pub trait Detector: Send + Sync {
    /// 检测器名称 (日志用)
    fn name(&self) -> &str {
        "detector"
    }

    /// 等待模型就绪,`start()` 中调用一次
    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    /// 单帧检测
    async fn detect(&self, frame: &Frame, config: &PipelineConfig) -> Result<Detections>;
}

/// 帧源: 每次检测前取一帧
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<Frame>;
}

/// 通道帧源 (解码线程 → 调度器)
///
/// 每次取通道中最新的一帧,丢弃积压的旧帧; 通道暂时为空时重复上一帧。
pub struct ChannelSource {
    rx: Receiver<Frame>,
    latest: Option<Frame>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<Frame>) -> Self {
        Self { rx, latest: None }
    }
}

impl FrameSource for ChannelSource {
    fn capture(&mut self) -> Result<Frame> {
        if let Some(frame) = self.rx.try_iter().last() {
            self.latest = Some(frame);
        }
        self.latest
            .clone()
            .ok_or_else(|| Error::Detector("no frame available".to_string()))
    }
}

/// 固定尺寸的空帧源 (合成检测器不需要像素)
pub struct BlankSource {
    width: u32,
    height: u32,
    frame_id: u64,
}

impl BlankSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_id: 0,
        }
    }
}

impl FrameSource for BlankSource {
    fn capture(&mut self) -> Result<Frame> {
        self.frame_id += 1;
        Ok(Frame::empty(self.width, self.height, self.frame_id))
    }
}
