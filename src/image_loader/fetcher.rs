//! # 字节获取模块
//!
//! ## 设计思路
//!
//! “把来源变成字节流”是平台能力，核心链路只依赖 [`ByteFetcher`] / [`ByteStream`]
//! 两个 trait，测试可注入假实现。
//!
//! ## 实现思路
//!
//! 默认实现 [`SourceFetcher`]：
//! - URL：状态码 + 内容类型 + 声明体积校验，之后按传输层分块流式读取。
//! - Base64：格式解析 + 解码前体积估算，整体作为单块输出。
//! - 文件：metadata 体积校验后按固定缓冲分块读取。
//! - 网络错误统一映射到 `LoadError`，便于上层归类。
//!
//! 这里不做重试：失败只上报一次。

use std::future::Future;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use tokio::io::AsyncReadExt;

use super::source::redact_url_for_log;
use super::{ImageSource, LoadError, LoaderConfig};

const FILE_READ_BUFFER_BYTES: usize = 64 * 1024;

/// 一次打开的字节流：有限、不可重启。
pub trait ByteStream: Send {
    /// 读取下一段字节；`None` 表示传输结束。块大小由传输层决定。
    fn next_bytes(&mut self) -> impl Future<Output = Result<Option<Bytes>, LoadError>> + Send;

    /// 传输层声明的总长度（如 Content-Length），未知时为 `None`。
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

/// 字节获取能力：按来源打开一条新的字节流。
pub trait ByteFetcher: Send + Sync + 'static {
    type Stream: ByteStream + 'static;

    fn open(
        &self,
        source: &ImageSource,
    ) -> impl Future<Output = Result<Self::Stream, LoadError>> + Send;
}

/// 默认字节获取实现（HTTP / 文件 / Base64）。
pub struct SourceFetcher {
    client: reqwest::Client,
    max_file_size: u64,
    read_timeout: u64,
}

/// [`SourceFetcher`] 打开的字节流。
pub enum SourceStream {
    Http {
        response: reqwest::Response,
        url: String,
        read_timeout: u64,
    },
    File {
        file: tokio::fs::File,
        len: u64,
    },
    Memory(Option<Bytes>),
}

impl SourceFetcher {
    /// 根据配置构建复用型 HTTP 客户端。
    ///
    /// 连接/读取超时属于传输层自身的超时，加载链路不会另外叠加。
    pub fn new(config: &LoaderConfig) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .read_timeout(Duration::from_secs(config.read_timeout))
            .build()
            .map_err(|e| LoadError::Network(format!("无法创建 HTTP 客户端：{}", e)))?;

        Ok(Self {
            client,
            max_file_size: config.max_file_size,
            read_timeout: config.read_timeout,
        })
    }

    async fn open_url(&self, url: &str) -> Result<SourceStream, LoadError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| LoadError::InvalidSource(format!("URL 格式错误：{}", e)))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(LoadError::InvalidSource("仅支持 HTTP/HTTPS".to_string()));
        }

        log::debug!("📡 发送 HTTP 请求 - {}", redact_url_for_log(url));
        let response = self
            .client
            .get(parsed)
            .header(
                reqwest::header::ACCEPT,
                "image/avif,image/webp,image/apng,image/*,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, url, self.read_timeout))?;

        if !response.status().is_success() {
            return Err(LoadError::Network(format!(
                "HTTP {}: {}",
                response.status().as_u16(),
                status_message(response.status().as_u16())
            )));
        }

        if let Some(ct) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            if let Ok(ct_str) = ct.to_str() {
                if !is_image_content_type(ct_str) {
                    return Err(LoadError::UnsupportedFormat(format!("不是图片类型：{}", ct_str)));
                }
            }
        }

        if let Some(size) = response.content_length() {
            if size > self.max_file_size {
                return Err(LoadError::ResourceLimit(format!(
                    "文件过大：{:.2} MB（限制：{:.2} MB）",
                    size as f64 / 1024.0 / 1024.0,
                    self.max_file_size as f64 / 1024.0 / 1024.0
                )));
            }
        }

        Ok(SourceStream::Http {
            response,
            url: url.to_string(),
            read_timeout: self.read_timeout,
        })
    }

    async fn open_file(&self, path: &std::path::Path) -> Result<SourceStream, LoadError> {
        log::debug!("📁 打开本地图片 - 路径: {}", path.display());

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| LoadError::FileSystem(format!("无法读取文件信息：{}", e)))?;

        if !metadata.is_file() {
            return Err(LoadError::FileSystem(format!("不是文件：{}", path.display())));
        }

        if metadata.len() > self.max_file_size {
            return Err(LoadError::ResourceLimit(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                self.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| LoadError::FileSystem(format!("无法打开图片文件：{}", e)))?;

        Ok(SourceStream::File {
            file,
            len: metadata.len(),
        })
    }
}

impl ByteFetcher for SourceFetcher {
    type Stream = SourceStream;

    async fn open(&self, source: &ImageSource) -> Result<SourceStream, LoadError> {
        match source {
            ImageSource::Url(url) => self.open_url(url).await,
            ImageSource::FilePath(path) => self.open_file(path).await,
            ImageSource::Base64(data) => {
                let bytes = parse_base64_with_limit(data, self.max_file_size)?;
                Ok(SourceStream::Memory(Some(Bytes::from(bytes))))
            }
        }
    }
}

impl ByteStream for SourceStream {
    async fn next_bytes(&mut self) -> Result<Option<Bytes>, LoadError> {
        match self {
            Self::Http {
                response,
                url,
                read_timeout,
            } => response
                .chunk()
                .await
                .map_err(|e| map_reqwest_error(e, url, *read_timeout)),
            Self::File { file, .. } => {
                let mut buffer = vec![0u8; FILE_READ_BUFFER_BYTES];
                let read = file
                    .read(&mut buffer)
                    .await
                    .map_err(|e| LoadError::FileSystem(format!("无法读取图片文件：{}", e)))?;
                if read == 0 {
                    return Ok(None);
                }
                buffer.truncate(read);
                Ok(Some(Bytes::from(buffer)))
            }
            Self::Memory(bytes) => Ok(bytes.take()),
        }
    }

    fn size_hint(&self) -> Option<u64> {
        match self {
            Self::Http { response, .. } => response.content_length(),
            Self::File { len, .. } => Some(*len),
            Self::Memory(bytes) => bytes.as_ref().map(|b| b.len() as u64),
        }
    }
}

/// 统一映射 reqwest 错误到业务错误。
fn map_reqwest_error(e: reqwest::Error, url: &str, read_timeout: u64) -> LoadError {
    let err_msg = sanitize_error_message_with_redacted_url(&e.to_string(), url);

    if e.is_timeout() {
        LoadError::Timeout(format!("传输超时（{}秒）：{}", read_timeout, err_msg))
    } else if e.is_connect() {
        LoadError::Network(format!("无法连接：{}", err_msg))
    } else {
        LoadError::Network(format!("请求失败：{}", err_msg))
    }
}

fn sanitize_error_message_with_redacted_url(error_msg: &str, url: &str) -> String {
    let redacted = redact_url_for_log(url);
    error_msg.replace(url, &redacted)
}

fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|base| {
            let base = base.trim().to_ascii_lowercase();
            base.starts_with("image/") || base == "application/octet-stream"
        })
        .unwrap_or(false)
}

/// 常见 HTTP 状态码本地化文案。
fn status_message(code: u16) -> &'static str {
    match code {
        404 => "未找到",
        403 => "访问被拒绝",
        500..=599 => "服务器错误",
        _ => "请求失败",
    }
}

fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> Result<u64, LoadError> {
    let len = base64_data.trim().len() as u64;
    let groups = len
        .checked_add(3)
        .ok_or_else(|| LoadError::ResourceLimit("Base64 输入长度溢出".to_string()))?
        / 4;

    groups
        .checked_mul(3)
        .ok_or_else(|| LoadError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
}

/// 解析 Base64 输入（支持 Data URL / 纯 Base64），解码前先按估算体积拒绝。
fn parse_base64_with_limit(data: &str, max_file_size: u64) -> Result<Vec<u8>, LoadError> {
    let normalized = data.trim();

    let base64_data = if normalized.starts_with("data:") {
        let base64_start = normalized
            .find(";base64,")
            .ok_or_else(|| LoadError::InvalidSource("缺少 base64 标记".to_string()))?;
        &normalized[base64_start + 8..]
    } else {
        normalized
    };

    let estimated_len = estimate_base64_decoded_upper_bound_len(base64_data)?;
    if estimated_len > max_file_size {
        return Err(LoadError::ResourceLimit(format!(
            "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
            estimated_len as f64 / 1024.0 / 1024.0,
            max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    general_purpose::STANDARD
        .decode(base64_data)
        .map_err(|e| LoadError::InvalidSource(format!("Base64 解码失败：{}", e)))
}
