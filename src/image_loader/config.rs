//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `LoaderConfig`，保证运行时行为可观测、可调整、可测试。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的配置。
//! - `validate` 在创建加载器时统一做范围校验，尽早失败。
//! - `from_json` 支持由宿主以 JSON（可只写部分字段）下发配置。
//! - 连接/读取超时只作用于默认 HTTP 传输层，加载链路本身不再叠加超时。

use std::time::Duration;

use fast_image_resize as fr;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use super::LoadError;

/// 加载策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
    /// 一次性读取后直接解码为目标尺寸的缩略图。
    #[default]
    Downsample,
    /// 边下载边解码，按节流窗口推送中间帧。
    Incremental,
}

/// 降采样滤镜。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    pub(crate) fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }

    pub(crate) fn to_fast_filter(self) -> fr::FilterType {
        match self {
            Self::Nearest => fr::FilterType::Box,
            Self::Triangle => fr::FilterType::Bilinear,
            Self::CatmullRom => fr::FilterType::CatmullRom,
            Self::Lanczos3 => fr::FilterType::Lanczos3,
        }
    }
}

/// 图片加载配置。
///
/// 字段覆盖了传输、分块、节流与解码四个阶段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub strategy: LoadStrategy,
    /// 增量模式下单次喂给解码器的最大字节数。
    pub chunk_bytes: usize,
    /// 两次帧推送之间的最小间隔（毫秒）。
    pub throttle_interval_ms: u64,
    /// 下载/读取原始字节时允许的最大体积（字节）。
    pub max_file_size: u64,
    /// 解码像素上限（`width * height`），按 header 尺寸预检。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
    pub resize_filter: ResizeFilter,
    /// 建立连接（TCP/TLS）超时时间（秒）。
    pub connect_timeout: u64,
    /// 单次读取超时时间（秒）。
    pub read_timeout: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            strategy: LoadStrategy::Downsample,
            chunk_bytes: 32 * 1024,
            throttle_interval_ms: 20,
            max_file_size: 50 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
            resize_filter: ResizeFilter::Triangle,
            connect_timeout: 8,
            read_timeout: 15,
        }
    }
}

impl LoaderConfig {
    /// 解析 JSON 配置，缺省字段取默认值，解析后立即校验。
    ///
    /// # 示例
    /// ```rust
    /// use async_downsampling_image::image_loader::{LoadStrategy, LoaderConfig};
    ///
    /// let config = LoaderConfig::from_json(r#"{"strategy":"incremental","chunk_bytes":1024}"#)?;
    /// assert_eq!(config.strategy, LoadStrategy::Incremental);
    /// # Ok::<(), async_downsampling_image::image_loader::LoadError>(())
    /// ```
    pub fn from_json(text: &str) -> Result<Self, LoadError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| LoadError::InvalidConfig(format!("配置解析失败：{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if !(256..=8 * 1024 * 1024).contains(&self.chunk_bytes) {
            return Err(LoadError::InvalidConfig(
                "chunk_bytes 必须在 256B~8MB 之间".to_string(),
            ));
        }
        if !(1..=1_000).contains(&self.throttle_interval_ms) {
            return Err(LoadError::InvalidConfig(
                "throttle_interval_ms 必须在 1~1000 毫秒之间".to_string(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(LoadError::InvalidConfig("max_file_size 不能为 0".to_string()));
        }
        if self.max_decoded_pixels == 0 {
            return Err(LoadError::InvalidConfig("max_decoded_pixels 不能为 0".to_string()));
        }
        if self.max_decoded_bytes < 8 * 1024 * 1024 {
            return Err(LoadError::InvalidConfig(
                "max_decoded_bytes 不能小于 8MB".to_string(),
            ));
        }
        if !(1..=120).contains(&self.connect_timeout) {
            return Err(LoadError::InvalidConfig(
                "connect_timeout 必须在 1~120 秒之间".to_string(),
            ));
        }
        if !(1..=600).contains(&self.read_timeout) {
            return Err(LoadError::InvalidConfig(
                "read_timeout 必须在 1~600 秒之间".to_string(),
            ));
        }

        Ok(())
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }
}
