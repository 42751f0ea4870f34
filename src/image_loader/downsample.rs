//! # 加载流水线（一次性降采样路径）
//!
//! ## 设计思路
//!
//! `LoadPipeline` 只负责流程编排，不持有任何展示状态：
//! 1. 按来源打开字节流
//! 2. 分块读取到内存（受 `max_file_size` 约束，块间检查取消）
//! 3. 在阻塞线程上直接生成“长边不超过目标像素”的缩略图
//!
//! 解码总是从原始数据重新生成，不复用源文件里嵌入的缩略图；方向信息在解码时应用。
//!
//! ## 实现思路
//!
//! - 取数与解码能力都通过 trait 注入，测试可以替换为假实现。
//! - 记录 `fetch/decode/total` 阶段耗时，便于性能诊断。

use std::sync::Arc;
use std::time::Instant;

use super::{
    ByteFetcher, ChunkedReader, Frame, ImageCodec, ImageSource, LoadError, LoaderConfig,
    SizeSpec,
};

/// 一次加载尝试所需的全部能力（取数 + 解码 + 配置快照）。
pub struct LoadPipeline<F, C> {
    pub(super) fetcher: Arc<F>,
    pub(super) codec: Arc<C>,
    pub(super) config: LoaderConfig,
}

impl<F, C> LoadPipeline<F, C>
where
    F: ByteFetcher,
    C: ImageCodec,
{
    pub fn new(config: LoaderConfig, fetcher: F, codec: C) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            codec: Arc::new(codec),
            config,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// 下载完整数据后一次性解码为有界缩略图。
    ///
    /// 输出尺寸是“上界”而非精确值：长边不超过 `size.resolve().max_pixel_size()`，不放大。
    pub async fn downsample<Cx>(
        &self,
        source: &ImageSource,
        size: &SizeSpec,
        is_cancelled: &Cx,
    ) -> Result<Frame, LoadError>
    where
        Cx: Fn() -> bool + Send + Sync,
    {
        let total_start = Instant::now();
        let max_pixel_size = size.resolve().max_pixel_size();
        log::info!(
            "🧩 开始降采样加载：{}（max_pixel_size={}）",
            source.describe(),
            max_pixel_size
        );

        let fetch_start = Instant::now();
        let stream = self.fetcher.open(source).await?;
        let reader =
            ChunkedReader::new(stream, self.config.chunk_bytes, self.config.max_file_size);
        let bytes = reader.read_to_end(is_cancelled).await?;
        let fetch_ms = fetch_start.elapsed().as_millis();

        if is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let decode_start = Instant::now();
        let codec = Arc::clone(&self.codec);
        let byte_len = bytes.len();
        let frame = tokio::task::spawn_blocking(move || codec.thumbnail(&bytes, max_pixel_size))
            .await
            .map_err(|e| LoadError::Decode(format!("解码任务异常结束：{}", e)))??;
        let decode_ms = decode_start.elapsed().as_millis();

        log::info!(
            "✅ 降采样完成：{} bytes -> {}x{}（fetch={}ms, decode={}ms, total={}ms）",
            byte_len,
            frame.width(),
            frame.height(),
            fetch_ms,
            decode_ms,
            total_start.elapsed().as_millis()
        );

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_loader::{FailureKind, RasterCodec, SourceFetcher};
    use base64::{Engine as _, engine::general_purpose};
    use image::{ImageBuffer, ImageFormat, Rgba};
    use std::io::Cursor;

    fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 255) as u8, (y % 255) as u8, 96, 255])
        });
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    fn pipeline() -> LoadPipeline<SourceFetcher, RasterCodec> {
        let config = LoaderConfig::default();
        let fetcher = SourceFetcher::new(&config).expect("create fetcher");
        let codec = RasterCodec::from_config(&config);
        LoadPipeline::new(config, fetcher, codec)
    }

    fn data_url(bytes: &[u8]) -> ImageSource {
        ImageSource::Base64(format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(bytes)
        ))
    }

    #[tokio::test]
    async fn downsample_bounds_longer_edge() {
        let source = data_url(&create_png_bytes(400, 200));

        let frame = pipeline()
            .downsample(&source, &SizeSpec::width(100.0), &|| false)
            .await
            .expect("downsample");

        assert_eq!(frame.dimensions(), (100, 50));
        assert!(frame.is_complete());
    }

    #[tokio::test]
    async fn downsample_applies_scale_factor() {
        let source = data_url(&create_png_bytes(400, 200));

        let frame = pipeline()
            .downsample(&source, &SizeSpec::size(80.0, 40.0).with_scale(2.0), &|| false)
            .await
            .expect("downsample");

        assert_eq!(frame.dimensions(), (160, 80));
    }

    #[tokio::test]
    async fn downsample_reads_local_file() {
        let path = std::env::temp_dir().join(format!("downsample-{}.png", std::process::id()));
        std::fs::write(&path, create_png_bytes(64, 64)).expect("write temp png");

        let result = pipeline()
            .downsample(&ImageSource::FilePath(path.clone()), &SizeSpec::height(32.0), &|| false)
            .await;
        let _ = std::fs::remove_file(&path);

        assert_eq!(result.expect("downsample file").dimensions(), (32, 32));
    }

    #[tokio::test]
    async fn missing_file_is_fetch_failure() {
        let source =
            ImageSource::FilePath(std::env::temp_dir().join("definitely-missing-image.png"));

        let err = pipeline()
            .downsample(&source, &SizeSpec::width(10.0), &|| false)
            .await
            .expect_err("missing file must fail");

        assert_eq!(err.kind(), FailureKind::Fetch);
    }

    #[tokio::test]
    async fn corrupt_payload_is_decode_failure() {
        let source = data_url(b"definitely not an image payload");

        let err = pipeline()
            .downsample(&source, &SizeSpec::width(10.0), &|| false)
            .await
            .expect_err("corrupt data must fail");

        assert_eq!(err.kind(), FailureKind::Decode);
    }

    #[tokio::test]
    async fn cancelled_before_read_yields_cancelled() {
        let source = data_url(&create_png_bytes(8, 8));

        let err = pipeline()
            .downsample(&source, &SizeSpec::width(10.0), &|| true)
            .await
            .expect_err("cancelled load must fail");

        assert!(err.is_cancelled());
    }
}
