//! 错误类型
//! Error handling for the tracking pipeline

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 调度器已在运行
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// 调度器已停止 (终态,不可重启)
    #[error("Scheduler stopped")]
    Stopped,

    /// 检测器启动失败
    #[error("Detector not ready: {0}")]
    DetectorNotReady(String),

    /// 单帧检测失败
    #[error("Detector error: {0}")]
    Detector(String),

    /// 检测超时
    #[error("Detector timed out after {0}ms")]
    DetectorTimeout(u64),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
