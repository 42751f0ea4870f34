//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入类型”和“流水线产物”解耦：
//! - `ImageSource` 表示外部来源语义（URL / Base64 / 本地文件）
//! - `LoadTarget` 表示“当前应该显示什么”（来源 + 尺寸）
//! - `Frame` 表示已解码、不可变、可廉价克隆的 RGBA 位图

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use image::RgbaImage;

use super::{LoadError, SizeSpec};

/// 图片输入来源。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageSource {
    /// 网络地址来源（http / https）。
    Url(String),
    /// Base64（支持 Data URL 与纯 Base64 字符串）。
    Base64(String),
    /// 本地文件路径来源。
    FilePath(PathBuf),
}

impl ImageSource {
    /// 从字符串识别来源类型。
    ///
    /// - `http://` / `https://` → `Url`
    /// - `file://` → `FilePath`
    /// - `data:image/` → `Base64`
    /// - 其余按本地路径处理
    pub fn parse(location: &str) -> Result<Self, LoadError> {
        let trimmed = location.trim();
        if trimmed.is_empty() {
            return Err(LoadError::InvalidSource("来源地址为空".to_string()));
        }

        if trimmed.starts_with("data:") {
            return Ok(Self::Base64(trimmed.to_string()));
        }

        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            reqwest::Url::parse(trimmed)
                .map_err(|e| LoadError::InvalidSource(format!("URL 格式错误：{}", e)))?;
            return Ok(Self::Url(trimmed.to_string()));
        }

        if lower.starts_with("file://") {
            let url = reqwest::Url::parse(trimmed)
                .map_err(|e| LoadError::InvalidSource(format!("URL 格式错误：{}", e)))?;
            let path = url
                .to_file_path()
                .map_err(|_| LoadError::InvalidSource(format!("无法转换为本地路径：{}", trimmed)))?;
            return Ok(Self::FilePath(path));
        }

        Ok(Self::FilePath(PathBuf::from(trimmed)))
    }

    /// 日志用描述：URL 去掉 query/fragment，Base64 只保留长度。
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Url(url) => redact_url_for_log(url),
            Self::Base64(data) => format!("<base64 {} chars>", data.len()),
            Self::FilePath(path) => path.display().to_string(),
        }
    }
}

impl FromStr for ImageSource {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

pub(crate) fn redact_url_for_log(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return "<invalid-url>".to_string();
    };

    let host = parsed.host_str().unwrap_or("<unknown-host>");
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
    let path = parsed.path();

    format!("{}://{}{}{}", parsed.scheme(), host, port, path)
}

/// 当前加载目标。
///
/// 替换目标会让上一个目标的在途工作全部失效。
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTarget {
    pub source: ImageSource,
    pub size: SizeSpec,
}

impl LoadTarget {
    pub fn new(source: ImageSource, size: SizeSpec) -> Self {
        Self { source, size }
    }

    /// 结合解码帧的宽高比，给出展示层应使用的尺寸。
    pub fn display_size(&self, frame: &Frame) -> (f64, f64) {
        self.size
            .resolve()
            .complete_with_aspect(frame.width(), frame.height())
    }
}

/// 解码产物：不可变 RGBA 位图。
///
/// 内部为 `Arc`，克隆只增加引用计数，便于在 `Reloading` 期间新旧帧共存。
#[derive(Clone, PartialEq)]
pub struct Frame {
    image: Arc<RgbaImage>,
    complete: bool,
}

impl Frame {
    /// 完整解码得到的帧。
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            complete: true,
        }
    }

    /// 增量解码过程中的尽力而为帧。
    pub fn partial(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            complete: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("complete", &self.complete)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognizes_each_source_kind() {
        assert_eq!(
            ImageSource::parse("https://example.com/a.png").expect("parse url"),
            ImageSource::Url("https://example.com/a.png".to_string())
        );
        assert!(matches!(
            ImageSource::parse("data:image/png;base64,AAAA").expect("parse data url"),
            ImageSource::Base64(_)
        ));
        assert_eq!(
            ImageSource::parse("/tmp/a.png").expect("parse path"),
            ImageSource::FilePath(PathBuf::from("/tmp/a.png"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn parse_converts_file_url_to_path() {
        assert_eq!(
            ImageSource::parse("file:///tmp/photo.jpg").expect("parse file url"),
            ImageSource::FilePath(PathBuf::from("/tmp/photo.jpg"))
        );
    }

    #[test]
    fn parse_rejects_empty_and_malformed_locations() {
        assert!(matches!(ImageSource::parse("   "), Err(LoadError::InvalidSource(_))));
        assert!(matches!(ImageSource::parse("http://"), Err(LoadError::InvalidSource(_))));
    }

    #[test]
    fn redact_url_for_log_removes_query_and_fragment() {
        let redacted =
            redact_url_for_log("https://example.com:8443/path/img.png?token=abc123#hash");

        assert_eq!(redacted, "https://example.com:8443/path/img.png");
    }

    #[test]
    fn display_size_uses_frame_aspect_ratio_for_missing_edge() {
        let target = LoadTarget::new(
            ImageSource::Url("https://example.com/a.png".to_string()),
            SizeSpec::width(160.0),
        );
        let frame = Frame::new(RgbaImage::new(400, 300));

        assert_eq!(target.display_size(&frame), (160.0, 120.0));
    }

    #[test]
    fn frame_clones_share_pixels() {
        let frame = Frame::partial(RgbaImage::new(4, 2));
        let clone = frame.clone();

        assert!(std::ptr::eq(frame.image(), clone.image()));
        assert!(!clone.is_complete());
        assert_eq!(clone.dimensions(), (4, 2));
    }
}
