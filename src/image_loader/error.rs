//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载加载链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! 状态机对外只关心两类失败：获取失败（字节拿不到）与解码失败（字节拿到了但
//! 产出不了有效位图），由 [`LoadError::kind`] 归类。`Cancelled` 只在内部流转，
//! 永远不会变成 `Failed` 状态。

/// 图片加载统一错误类型。
///
/// 需要 `Clone`：失败会作为 `LoadState::Failed` 推送给多个订阅者。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("网络错误：{0}")]
    Network(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("来源无效：{0}")]
    InvalidSource(String),

    #[error("格式错误：{0}")]
    UnsupportedFormat(String),

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("配置错误：{0}")]
    InvalidConfig(String),

    #[error("加载已取消")]
    Cancelled,
}

/// 失败归类，供展示层区分“拿不到”与“解不开”。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Fetch,
    Decode,
    Config,
    Cancelled,
}

impl LoadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::FileSystem(_) | Self::InvalidSource(_) => {
                FailureKind::Fetch
            }
            Self::UnsupportedFormat(_) | Self::Decode(_) | Self::ResourceLimit(_) => {
                FailureKind::Decode
            }
            Self::InvalidConfig(_) => FailureKind::Config,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
