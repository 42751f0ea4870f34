//! # 目标尺寸解析
//!
//! 将“宽 / 高 / 宽高 + 缩放倍率”的尺寸描述换算成解码器可用的像素上限。
//! 纯函数，无 I/O，无失败分支：非正数或 NaN 属于调用方违约，不在此处兜底。
//!
//! 只给出单边时，另一边在解码出第一帧之前无法得知，
//! 以解码结果的宽高比为准（见 [`ResolvedSize::complete_with_aspect`]）。

use serde::{Deserialize, Serialize};

fn default_scale() -> f64 {
    1.0
}

/// 目标显示尺寸描述。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SizeSpec {
    /// 宽高均已知。
    Size {
        width: f64,
        height: f64,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// 仅宽度已知，高度按解码后的宽高比推导。
    Width {
        width: f64,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// 仅高度已知，宽度按解码后的宽高比推导。
    Height {
        height: f64,
        #[serde(default = "default_scale")]
        scale: f64,
    },
}

/// 解析结果。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSize {
    pub width: Option<f64>,
    pub height: Option<f64>,
    /// 长边像素上限（已乘缩放倍率），作为解码器的尺寸提示。
    pub max_dimension_pixels: f64,
}

impl SizeSpec {
    pub fn size(width: f64, height: f64) -> Self {
        Self::Size {
            width,
            height,
            scale: 1.0,
        }
    }

    pub fn width(width: f64) -> Self {
        Self::Width { width, scale: 1.0 }
    }

    pub fn height(height: f64) -> Self {
        Self::Height { height, scale: 1.0 }
    }

    /// 替换缩放倍率（通常传入屏幕像素密度）。
    ///
    /// # 示例
    /// ```rust
    /// use async_downsampling_image::image_loader::SizeSpec;
    ///
    /// let spec = SizeSpec::size(160.0, 90.0).with_scale(2.0);
    /// assert_eq!(spec.resolve().max_dimension_pixels, 320.0);
    /// ```
    pub fn with_scale(self, scale: f64) -> Self {
        match self {
            Self::Size { width, height, .. } => Self::Size {
                width,
                height,
                scale,
            },
            Self::Width { width, .. } => Self::Width { width, scale },
            Self::Height { height, .. } => Self::Height { height, scale },
        }
    }

    pub fn width_hint(&self) -> Option<f64> {
        match self {
            Self::Size { width, .. } | Self::Width { width, .. } => Some(*width),
            Self::Height { .. } => None,
        }
    }

    pub fn height_hint(&self) -> Option<f64> {
        match self {
            Self::Size { height, .. } | Self::Height { height, .. } => Some(*height),
            Self::Width { .. } => None,
        }
    }

    pub fn scale(&self) -> f64 {
        match self {
            Self::Size { scale, .. } | Self::Width { scale, .. } | Self::Height { scale, .. } => {
                *scale
            }
        }
    }

    pub fn resolve(&self) -> ResolvedSize {
        let width = self.width_hint();
        let height = self.height_hint();
        let longest = match (width, height) {
            (Some(w), Some(h)) => w.max(h),
            (Some(w), None) => w,
            (None, Some(h)) => h,
            (None, None) => 0.0,
        };

        ResolvedSize {
            width,
            height,
            max_dimension_pixels: longest * self.scale(),
        }
    }
}

impl ResolvedSize {
    /// 交给解码器的整数像素上限：向下取整，且不小于 1。
    pub fn max_pixel_size(&self) -> u32 {
        (self.max_dimension_pixels.floor() as u32).max(1)
    }

    /// 用解码帧的宽高比补全缺失的一边，返回 `(width, height)`。
    pub fn complete_with_aspect(&self, frame_width: u32, frame_height: u32) -> (f64, f64) {
        let fw = frame_width as f64;
        let fh = frame_height as f64;

        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) if fw > 0.0 => (w, w * fh / fw),
            (None, Some(h)) if fh > 0.0 => (h * fw / fh, h),
            (Some(w), None) => (w, w),
            (None, Some(h)) => (h, h),
            (None, None) => (fw, fh),
        }
    }
}
