//! # 解码能力模块
//!
//! ## 设计思路
//!
//! 平台解码能力抽象为两个操作，核心链路只依赖 trait，便于用假实现测试：
//! - 缩略图解码：`(编码字节, 长边像素上限) -> 位图`
//! - 增量解码：`(累计字节, 是否最后一次) -> 位图?`
//!
//! ## 实现思路
//!
//! 默认实现 [`RasterCodec`] 基于 `image` + `fast_image_resize`：
//! 1. 文件签名（magic bytes）校验
//! 2. 仅读取 header 尺寸，按像素 / 内存上限快速拒绝
//! 3. JPEG 走 DCT 缩放解码，直接得到不小于目标尺寸的最小档位，不生成全分辨率位图
//! 4. 非隔行 PNG 边解码边做区域平均，同样只保留目标尺寸的缓冲
//! 5. 其余格式完整解码后按长边上限降采样（不放大），源图类型原样进入缩放器，不额外转 RGBA
//! 6. 应用方向变换，输出 RGBA
//!
//! 增量解码按格式分别处理：
//! - PNG（非隔行）：逐行解码已到达的数据，未到达的行填充透明像素
//! - JPEG：`image` 的解码器容忍截断数据，前缀即可出图
//! - 其余格式（GIF、隔行 PNG 等）：前缀完整前不出部分帧，只等最终帧
//!
//! 前缀解码每次都从头开始，尝试间隔按数据量几何增长（上限 256 KiB 一次），
//! 避免每块数据都触发一次完整解码。

use fast_image_resize as fr;
use image::metadata::Orientation;
use image::{
    DynamicImage, GenericImageView, GrayImage, ImageDecoder, ImageFormat, ImageReader, RgbImage,
    Rgba, RgbaImage,
};
use std::io::Cursor;

use super::{Frame, LoadError, LoaderConfig, ResizeFilter};

/// 两次前缀解码之间，累计数据至少增长的字节数上限。
const PREFIX_DECODE_MAX_STEP: usize = 256 * 1024;

/// 增量解码会话持有的原生解码器句柄。
pub trait IncrementalDecoder: Send {
    /// 每次都传入目前为止收到的全部字节（解码器按总量而非增量工作）。
    ///
    /// - 非最终轮：数据不足返回 `Ok(None)`，中间失败同样视为“暂无帧”。
    /// - 最终轮：给出权威解码结果，失败返回错误。
    fn update(&mut self, cumulative: &[u8], is_final: bool) -> Result<Option<Frame>, LoadError>;
}

/// 平台解码能力。
pub trait ImageCodec: Send + Sync + 'static {
    type Incremental: IncrementalDecoder + 'static;

    /// 解码为长边不超过 `max_pixel_size` 的位图，总是基于原始数据重新生成。
    fn thumbnail(&self, bytes: &[u8], max_pixel_size: u32) -> Result<Frame, LoadError>;

    /// 为一次增量加载创建新的解码器。
    fn incremental(&self, max_pixel_size: u32) -> Self::Incremental;
}

/// 解码资源上限。
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    pub max_decoded_pixels: u64,
    pub max_decoded_bytes: u64,
}

/// 基于 `image` crate 的默认解码实现。
#[derive(Debug, Clone)]
pub struct RasterCodec {
    limits: DecodeLimits,
    filter: ResizeFilter,
}

/// [`RasterCodec`] 的增量解码器。
pub struct RasterIncrementalDecoder {
    codec: RasterCodec,
    max_pixel_size: u32,
    last_attempt_len: usize,
    /// 已执行的解码次数（含最终轮）。
    attempts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodePass {
    /// 数据完整，给出权威结果。
    Complete,
    /// 数据可能被截断，尽力出图。
    Prefix,
}

impl RasterCodec {
    pub fn new(limits: DecodeLimits, filter: ResizeFilter) -> Self {
        Self { limits, filter }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(
            DecodeLimits {
                max_decoded_pixels: config.max_decoded_pixels,
                max_decoded_bytes: config.max_decoded_bytes,
            },
            config.resize_filter,
        )
    }

    fn decode_to_fit(
        &self,
        bytes: &[u8],
        max_pixel_size: u32,
        pass: DecodePass,
    ) -> Result<DynamicImage, LoadError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| LoadError::UnsupportedFormat(format!("无法识别图片格式：{}", e)))?;

        let format = reader
            .format()
            .ok_or_else(|| LoadError::UnsupportedFormat("无法识别图片格式".to_string()))?;

        let mut decoder = reader
            .into_decoder()
            .map_err(|e| LoadError::Decode(format!("无法创建解码器：{}", e)))?;

        let (header_width, header_height) = decoder.dimensions();
        self.validate_pixel_limits(header_width, header_height)?;
        self.validate_decoded_memory_limits(header_width, header_height)?;

        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

        let scaled = match (format, pass) {
            (ImageFormat::Jpeg, DecodePass::Complete) => {
                decode_jpeg_scaled(bytes, header_width, header_height, max_pixel_size)
            }
            (ImageFormat::Png, DecodePass::Complete) => {
                decode_png_reduced(bytes, max_pixel_size)?.map(DynamicImage::ImageRgba8)
            }
            (ImageFormat::Png, DecodePass::Prefix) => {
                decode_png_rows(bytes)?.map(DynamicImage::ImageRgba8)
            }
            _ => None,
        };

        let decoded = match scaled {
            Some(image) => image,
            None => DynamicImage::from_decoder(decoder)
                .map_err(|e| LoadError::Decode(format!("图片解码失败：{}", e)))?,
        };

        let mut fitted = self.downscale_to_fit(decoded, max_pixel_size)?;
        fitted.apply_orientation(orientation);

        Ok(fitted)
    }

    /// 校验像素数量是否超过配置上限。
    fn validate_pixel_limits(&self, width: u32, height: u32) -> Result<(), LoadError> {
        let pixels = (width as u64)
            .checked_mul(height as u64)
            .ok_or_else(|| LoadError::ResourceLimit("图片像素数溢出".to_string()))?;

        if pixels > self.limits.max_decoded_pixels {
            return Err(LoadError::ResourceLimit(format!(
                "图片像素过大：{} 像素（限制：{} 像素）",
                pixels, self.limits.max_decoded_pixels
            )));
        }

        Ok(())
    }

    fn validate_decoded_memory_limits(&self, width: u32, height: u32) -> Result<(), LoadError> {
        let estimated = (width as u64)
            .checked_mul(height as u64)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| LoadError::ResourceLimit("图片解码内存估算溢出".to_string()))?;

        if estimated > self.limits.max_decoded_bytes {
            return Err(LoadError::ResourceLimit(format!(
                "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
                estimated as f64 / 1024.0 / 1024.0,
                self.limits.max_decoded_bytes as f64 / 1024.0 / 1024.0
            )));
        }

        Ok(())
    }

    /// 按长边上限等比缩小；已经足够小则原样返回。
    fn downscale_to_fit(
        &self,
        image: DynamicImage,
        max_pixel_size: u32,
    ) -> Result<DynamicImage, LoadError> {
        let (width, height) = image.dimensions();
        let (target_width, target_height) = fit_within(width, height, max_pixel_size);

        if (target_width, target_height) == (width, height) {
            return Ok(image);
        }

        log::debug!(
            "🧩 降采样：{}x{} -> {}x{}（filter={:?}）",
            width,
            height,
            target_width,
            target_height,
            self.filter
        );

        match resize_with_fast_image_resize(&image, target_width, target_height, self.filter) {
            Ok(resized) => Ok(resized),
            Err(err) => {
                log::warn!(
                    "⚠️ fast_image_resize 降采样失败，回退 image::resize_exact：{}",
                    err
                );
                Ok(image.resize_exact(
                    target_width,
                    target_height,
                    self.filter.to_image_filter(),
                ))
            }
        }
    }
}

impl ImageCodec for RasterCodec {
    type Incremental = RasterIncrementalDecoder;

    fn thumbnail(&self, bytes: &[u8], max_pixel_size: u32) -> Result<Frame, LoadError> {
        validate_image_signature(bytes)?;
        let image = self.decode_to_fit(bytes, max_pixel_size, DecodePass::Complete)?;
        Ok(Frame::new(image.into_rgba8()))
    }

    fn incremental(&self, max_pixel_size: u32) -> RasterIncrementalDecoder {
        RasterIncrementalDecoder {
            codec: self.clone(),
            max_pixel_size,
            last_attempt_len: 0,
            attempts: 0,
        }
    }
}

impl IncrementalDecoder for RasterIncrementalDecoder {
    fn update(&mut self, cumulative: &[u8], is_final: bool) -> Result<Option<Frame>, LoadError> {
        if is_final {
            self.attempts += 1;
            log::debug!(
                "🧩 最终解码：{} bytes，本次加载共 {} 次解码",
                cumulative.len(),
                self.attempts
            );
            return self.codec.thumbnail(cumulative, self.max_pixel_size).map(Some);
        }

        if !prefix_attempt_due(self.last_attempt_len, cumulative.len()) {
            return Ok(None);
        }
        self.last_attempt_len = cumulative.len();
        self.attempts += 1;

        match self
            .codec
            .decode_to_fit(cumulative, self.max_pixel_size, DecodePass::Prefix)
        {
            Ok(image) => Ok(Some(Frame::partial(image.into_rgba8()))),
            Err(err) => {
                log::trace!("⏳ 前缀 {} bytes 暂不可解码：{}", cumulative.len(), err);
                Ok(None)
            }
        }
    }
}

/// 累计数据相对上次尝试至少翻倍（或增长 256 KiB）才再解一次。
fn prefix_attempt_due(last_attempt_len: usize, len: usize) -> bool {
    if last_attempt_len == 0 {
        return len > 0;
    }
    let step = last_attempt_len.min(PREFIX_DECODE_MAX_STEP);
    len >= last_attempt_len.saturating_add(step)
}

/// 计算等比缩放到长边不超过 `max_pixel_size` 的尺寸，不放大。
pub(crate) fn fit_within(width: u32, height: u32, max_pixel_size: u32) -> (u32, u32) {
    let max_pixel_size = max_pixel_size.max(1);
    let longest = width.max(height);
    if longest == 0 || longest <= max_pixel_size {
        return (width, height);
    }

    let scale = max_pixel_size as f64 / longest as f64;
    let target_width = ((width as f64 * scale).floor() as u32).clamp(1, max_pixel_size);
    let target_height = ((height as f64 * scale).floor() as u32).clamp(1, max_pixel_size);

    (target_width, target_height)
}

/// JPEG DCT 缩放解码：输出为不小于目标尺寸的最小 1/1、1/2、1/4、1/8 档位。
///
/// 不支持的像素格式或解码失败返回 `None`，交回通用路径处理。
fn decode_jpeg_scaled(
    bytes: &[u8],
    width: u32,
    height: u32,
    max_pixel_size: u32,
) -> Option<DynamicImage> {
    let (request_width, request_height) = fit_within(width, height, max_pixel_size);
    let request_width = u16::try_from(request_width).unwrap_or(u16::MAX);
    let request_height = u16::try_from(request_height).unwrap_or(u16::MAX);

    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    let scaled = decoder
        .read_info()
        .and_then(|_| decoder.scale(request_width, request_height));
    let (scaled_width, scaled_height) = match scaled {
        Ok(size) => size,
        Err(err) => {
            log::debug!("JPEG 缩放解码不可用，回退完整解码：{}", err);
            return None;
        }
    };

    let pixels = match decoder.decode() {
        Ok(pixels) => pixels,
        Err(err) => {
            log::debug!("JPEG 缩放解码失败，回退完整解码：{}", err);
            return None;
        }
    };

    let (w, h) = (scaled_width as u32, scaled_height as u32);
    let image = match decoder.info().map(|info| info.pixel_format) {
        Some(jpeg_decoder::PixelFormat::RGB24) => {
            RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8)
        }
        Some(jpeg_decoder::PixelFormat::L8) => {
            GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8)
        }
        _ => None,
    };

    if image.is_some() {
        log::debug!("🧩 JPEG DCT 缩放：{}x{} -> {}x{}", width, height, w, h);
    }
    image
}

/// 非隔行 PNG 的逐行读取器，每行展开为 RGBA。
struct PngRows<'a> {
    reader: png::Reader<Cursor<&'a [u8]>>,
    width: u32,
    height: u32,
    channels: usize,
}

impl<'a> PngRows<'a> {
    /// 隔行扫描或调色板输出时返回 `None`，交回通用路径。
    fn open(bytes: &'a [u8]) -> Result<Option<Self>, LoadError> {
        let mut decoder = png::Decoder::new(Cursor::new(bytes));
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let reader = decoder
            .read_info()
            .map_err(|e| LoadError::Decode(format!("PNG 头部解析失败：{}", e)))?;

        let info = reader.info();
        let (width, height) = (info.width, info.height);
        if info.interlaced {
            return Ok(None);
        }

        let channels = match reader.output_color_type().0 {
            png::ColorType::Grayscale => 1,
            png::ColorType::GrayscaleAlpha => 2,
            png::ColorType::Rgb => 3,
            png::ColorType::Rgba => 4,
            png::ColorType::Indexed => return Ok(None),
        };

        Ok(Some(Self {
            reader,
            width,
            height,
            channels,
        }))
    }

    /// 读取下一行并逐像素回调；数据结束返回 `Ok(false)`。
    fn next_row<P>(&mut self, mut put: P) -> Result<bool, LoadError>
    where
        P: FnMut(u32, [u8; 4]),
    {
        let row = self
            .reader
            .next_row()
            .map_err(|e| LoadError::Decode(format!("PNG 行数据解码失败：{}", e)))?;
        let Some(row) = row else {
            return Ok(false);
        };

        let data = row.data();
        if data.len() < self.width as usize * self.channels {
            return Err(LoadError::Decode("PNG 行数据长度不足".to_string()));
        }
        for (x, px) in data
            .chunks_exact(self.channels)
            .take(self.width as usize)
            .enumerate()
        {
            let rgba = match px {
                &[g] => [g, g, g, 255],
                &[g, a] => [g, g, g, a],
                &[r, g, b] => [r, g, b, 255],
                &[r, g, b, a] => [r, g, b, a],
                _ => [0, 0, 0, 0],
            };
            put(x as u32, rgba);
        }
        Ok(true)
    }
}

/// 逐行解码 PNG 前缀：已到达的行原样输出，其余行保持透明。
///
/// 一行都还没到时返回 `None`。
fn decode_png_rows(bytes: &[u8]) -> Result<Option<RgbaImage>, LoadError> {
    let Some(mut rows) = PngRows::open(bytes)? else {
        return Ok(None);
    };

    let mut canvas = RgbaImage::new(rows.width, rows.height);
    let mut y = 0u32;
    while y < rows.height {
        let put = |x: u32, rgba: [u8; 4]| canvas.put_pixel(x, y, Rgba(rgba));
        match rows.next_row(put) {
            Ok(true) => y += 1,
            _ => break,
        }
    }

    if y == 0 {
        return Ok(None);
    }
    log::trace!("PNG 前缀已解出 {}/{} 行", y, rows.height);
    Ok(Some(canvas))
}

/// 边解码边做区域平均，只保留目标尺寸的累加缓冲，不生成全分辨率位图。
///
/// 颜色按 alpha 加权累加，透明像素不会把边缘染黑。
fn decode_png_reduced(bytes: &[u8], max_pixel_size: u32) -> Result<Option<RgbaImage>, LoadError> {
    let Some(mut rows) = PngRows::open(bytes)? else {
        return Ok(None);
    };
    let (width, height) = (rows.width, rows.height);
    let (target_width, target_height) = fit_within(width, height, max_pixel_size);
    if (target_width, target_height) == (width, height) {
        return Ok(None);
    }

    // 每个目标像素：[r*a, g*a, b*a, a, 像素数]
    let mut sums = vec![[0u64; 5]; target_width as usize * target_height as usize];
    let column: Vec<usize> = (0..width)
        .map(|x| (x as u64 * target_width as u64 / width as u64) as usize)
        .collect();

    for y in 0..height {
        let ty = (y as u64 * target_height as u64 / height as u64) as usize;
        let line = &mut sums[ty * target_width as usize..(ty + 1) * target_width as usize];
        let more = rows.next_row(|x, [r, g, b, a]| {
            let cell = &mut line[column[x as usize]];
            let alpha = a as u64;
            cell[0] += r as u64 * alpha;
            cell[1] += g as u64 * alpha;
            cell[2] += b as u64 * alpha;
            cell[3] += alpha;
            cell[4] += 1;
        })?;
        if !more {
            return Err(LoadError::Decode(format!("PNG 数据提前结束：{}/{} 行", y, height)));
        }
    }

    let mut output = RgbaImage::new(target_width, target_height);
    for (pixel, cell) in output.pixels_mut().zip(&sums) {
        let [r, g, b, a, count] = *cell;
        if count == 0 || a == 0 {
            continue;
        }
        *pixel = Rgba([
            (r / a) as u8,
            (g / a) as u8,
            (b / a) as u8,
            (a / count) as u8,
        ]);
    }

    log::debug!(
        "🧩 PNG 逐行区域平均：{}x{} -> {}x{}",
        width,
        height,
        target_width,
        target_height
    );
    Ok(Some(output))
}

/// 源图保持原像素类型直接送入缩放器，目标缓冲与源同类型。
fn resize_with_fast_image_resize(
    image: &DynamicImage,
    target_width: u32,
    target_height: u32,
    filter: ResizeFilter,
) -> Result<DynamicImage, LoadError> {
    let mut dst_image = DynamicImage::new(target_width, target_height, image.color());

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(filter.to_fast_filter()));

    resizer
        .resize(image, &mut dst_image, Some(&options))
        .map_err(|e| LoadError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

    Ok(dst_image)
}

/// 通过文件签名（magic bytes）校验输入是否为图片。
fn validate_image_signature(bytes: &[u8]) -> Result<(), LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Decode("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| LoadError::UnsupportedFormat("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(LoadError::UnsupportedFormat(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(())
}
