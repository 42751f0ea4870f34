//! # 异步降采样图片加载模块
//!
//! ## 设计思路
//!
//! 把“显示一张远程/本地图片”拆成几段互不耦合的能力：
//! 1. `size`：把展示尺寸（逻辑点 × 缩放因子）换算成像素上界
//! 2. `fetcher` + `chunked`：按来源打开字节流，并切成有界小块
//! 3. `codec`：一次性缩略图解码 / 基于前缀数据的增量解码
//! 4. `throttle`：中间帧推送节流
//! 5. `state` + `loader`：世代号保护的加载状态机
//!
//! ## 数据流
//!
//! ```text
//! set_target ──► ImageLoader ──► LoadPipeline
//!                    │              ├─ downsample:   fetch ─► read_to_end ─► thumbnail
//!                    │              └─ incremental:  fetch ─► next_chunk ─► StreamSession ─► ThrottledScheduler
//!                    ▼
//!               LoadStateCell ──► subscribe() ──► StateTransition { generation, state }
//! ```

mod chunked;
mod codec;
pub mod config;
mod downsample;
pub mod error;
mod fetcher;
mod incremental;
mod loader;
pub mod size;
mod source;
mod state;
mod throttle;

pub use chunked::ChunkedReader;
pub use codec::{
    DecodeLimits, ImageCodec, IncrementalDecoder, RasterCodec, RasterIncrementalDecoder,
};
pub use config::{LoadStrategy, LoaderConfig, ResizeFilter};
pub use downsample::LoadPipeline;
pub use error::{FailureKind, LoadError};
pub use fetcher::{ByteFetcher, ByteStream, SourceFetcher, SourceStream};
pub use incremental::StreamSession;
pub use loader::ImageLoader;
pub use size::{ResolvedSize, SizeSpec};
pub use source::{Frame, ImageSource, LoadTarget};
pub use state::{LoadState, StateTransition};
pub use throttle::{DEFAULT_THROTTLE_INTERVAL, ThrottledScheduler};
