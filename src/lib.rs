//! # 异步降采样图片加载 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  展示层（任意 UI / 渲染线程）             │
//! │                                                          │
//! │   set_target / reload / teardown      subscribe()        │
//! └───────┬──────────────────────────────────────▲───────────┘
//!         ▼                                      │ StateTransition
//! ┌──────────────────────────────────────────────┴───────────┐
//! │                     image_loader                         │
//! │                                                          │
//! │  ┌─ loader ────── ImageLoader（世代号 + 任务取消）         │
//! │  ├─ state ─────── LoadState 状态机 + 订阅推送             │
//! │  ├─ downsample ── 一次性读取 → 缩略图解码                 │
//! │  ├─ incremental ─ 分块读取 → 增量解码 → 节流推送          │
//! │  ├─ throttle ──── 帧推送节流（尾沿补发）                  │
//! │  ├─ fetcher ───── HTTP / 本地文件 / Base64 字节流          │
//! │  ├─ chunked ───── 有界分块读取                            │
//! │  ├─ codec ─────── image + fast_image_resize 解码降采样     │
//! │  ├─ size ──────── 展示尺寸 → 像素上限                     │
//! │  ├─ config ────── LoaderConfig（serde）                   │
//! │  └─ error ─────── LoadError（thiserror）                  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`image_loader`] | 按目标尺寸异步加载图片，输出有界 RGBA 帧与加载状态流 |

pub mod image_loader;
