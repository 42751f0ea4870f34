//! # 加载器（状态机驱动层）
//!
//! ## 设计思路
//!
//! `ImageLoader` 把“当前目标”映射成一串状态变更：
//! - 设置新目标：取消旧尝试，递增世代，发布 `Loading` / `Reloading(旧帧)`，启动新尝试。
//! - 清空目标：取消，递增世代，发布 `Idle`。
//! - 销毁：取消，不发布任何状态。
//!
//! ## 实现思路
//!
//! - 每次尝试是运行时上的一个独立任务，携带自己的世代号。
//! - 取消是双保险：旧任务被 `abort`，同时在途代码在块间/解码前比对世代号，
//!   发布点在状态锁内再校验一次，晚到的结果直接丢弃。
//! - 增量模式下每一帧经 `ThrottledScheduler` 节流后以 `Loaded` 发布。

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use super::state::LoadStateCell;
use super::{
    ByteFetcher, ImageCodec, LoadError, LoadPipeline, LoadState, LoadStrategy, LoadTarget,
    LoaderConfig, RasterCodec, SourceFetcher, StateTransition, ThrottledScheduler,
};

#[derive(Default)]
struct ActiveLoad {
    target: Option<LoadTarget>,
    task: Option<JoinHandle<()>>,
}

impl ActiveLoad {
    fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 异步图片加载器。
///
/// 取数与解码能力可替换；默认使用 [`SourceFetcher`] + [`RasterCodec`]。
pub struct ImageLoader<F = SourceFetcher, C = RasterCodec> {
    pipeline: Arc<LoadPipeline<F, C>>,
    states: Arc<LoadStateCell>,
    runtime: Handle,
    active: Mutex<ActiveLoad>,
}

impl ImageLoader {
    /// 使用默认取数/解码实现创建加载器。
    ///
    /// 必须在 Tokio 运行时内调用，加载任务会派发到该运行时。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use async_downsampling_image::image_loader::{
    ///     ImageLoader, ImageSource, LoadTarget, LoaderConfig, SizeSpec,
    /// };
    ///
    /// # async fn demo() -> Result<(), async_downsampling_image::image_loader::LoadError> {
    /// let loader = ImageLoader::new(LoaderConfig::default())?;
    /// let mut updates = loader.subscribe();
    /// loader.set_target(Some(LoadTarget::new(
    ///     ImageSource::parse("https://example.com/photo.jpg")?,
    ///     SizeSpec::width(160.0),
    /// )));
    /// while let Some(update) = updates.recv().await {
    ///     println!("{:?}", update.state);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: LoaderConfig) -> Result<Self, LoadError> {
        config.validate()?;
        let fetcher = SourceFetcher::new(&config)?;
        let codec = RasterCodec::from_config(&config);
        Self::assemble(config, fetcher, codec)
    }
}

impl<F, C> ImageLoader<F, C>
where
    F: ByteFetcher,
    C: ImageCodec,
{
    /// 使用自定义取数/解码实现创建加载器。
    pub fn with_backends(config: LoaderConfig, fetcher: F, codec: C) -> Result<Self, LoadError> {
        config.validate()?;
        Self::assemble(config, fetcher, codec)
    }

    /// 组装加载器；调用方负责先校验配置。
    fn assemble(config: LoaderConfig, fetcher: F, codec: C) -> Result<Self, LoadError> {
        let runtime = Handle::try_current().map_err(|e| {
            LoadError::InvalidConfig(format!("加载器必须在 Tokio 运行时内创建：{}", e))
        })?;

        log::debug!(
            "⚙️ 创建图片加载器：strategy={:?}, chunk={} bytes, throttle={}ms",
            config.strategy,
            config.chunk_bytes,
            config.throttle_interval_ms
        );

        Ok(Self {
            pipeline: Arc::new(LoadPipeline::new(config, fetcher, codec)),
            states: Arc::new(LoadStateCell::new()),
            runtime,
            active: Mutex::new(ActiveLoad::default()),
        })
    }

    fn lock_active(&self) -> MutexGuard<'_, ActiveLoad> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("加载任务锁中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    /// 设置（或清空）当前目标。
    ///
    /// 与当前目标相同则什么也不做。
    pub fn set_target(&self, target: Option<LoadTarget>) {
        let mut active = self.lock_active();
        if active.target == target {
            return;
        }

        active.cancel_task();
        active.target = target.clone();

        match target {
            Some(target) => {
                let generation = self.states.begin_attempt();
                active.task = Some(self.spawn_attempt(generation, target));
            }
            None => {
                self.states.reset_to_idle();
                log::debug!("🧹 已清空加载目标");
            }
        }
    }

    /// 对当前目标重新发起加载；已有帧时进入 `Reloading`。
    pub fn reload(&self) {
        let mut active = self.lock_active();
        let Some(target) = active.target.clone() else {
            return;
        };

        active.cancel_task();
        let generation = self.states.begin_attempt();
        active.task = Some(self.spawn_attempt(generation, target));
    }

    /// 取消在途加载，不发布任何状态。
    pub fn teardown(&self) {
        let mut active = self.lock_active();
        active.cancel_task();
        active.target = None;
        self.states.invalidate();
    }

    pub fn state(&self) -> LoadState {
        self.states.snapshot()
    }

    pub fn generation(&self) -> u64 {
        self.states.current_generation()
    }

    pub fn target(&self) -> Option<LoadTarget> {
        self.lock_active().target.clone()
    }

    /// 订阅后续状态变更（不包含订阅前的历史）。
    pub fn subscribe(&self) -> UnboundedReceiver<StateTransition> {
        self.states.subscribe()
    }

    fn spawn_attempt(&self, generation: u64, target: LoadTarget) -> JoinHandle<()> {
        log::info!(
            "📡 加载尝试 #{}：{}（strategy={:?}）",
            generation,
            target.source.describe(),
            self.pipeline.config().strategy
        );

        self.runtime.spawn(run_attempt(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.states),
            generation,
            target,
        ))
    }
}

impl<F, C> Drop for ImageLoader<F, C> {
    fn drop(&mut self) {
        let active = match self.active.get_mut() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.cancel_task();
        self.states.invalidate();
    }
}

async fn run_attempt<F, C>(
    pipeline: Arc<LoadPipeline<F, C>>,
    states: Arc<LoadStateCell>,
    generation: u64,
    target: LoadTarget,
) where
    F: ByteFetcher,
    C: ImageCodec,
{
    let cancel_states = Arc::clone(&states);
    let is_cancelled = move || cancel_states.current_generation() != generation;

    let result = match pipeline.config().strategy {
        LoadStrategy::Downsample => pipeline
            .downsample(&target.source, &target.size, &is_cancelled)
            .await
            .map(|frame| {
                states.publish(generation, LoadState::Loaded(frame));
            }),
        LoadStrategy::Incremental => {
            let sink_states = Arc::clone(&states);
            let mut scheduler =
                ThrottledScheduler::new(pipeline.config().throttle_interval(), move |frame| {
                    sink_states.publish(generation, LoadState::Loaded(frame));
                });

            match pipeline
                .stream_incremental(&target.source, &target.size, &is_cancelled, &mut scheduler)
                .await
            {
                Ok(()) => {
                    scheduler.finish().await;
                    Ok(())
                }
                Err(err) => {
                    drop(scheduler);
                    Err(err)
                }
            }
        }
    };

    match result {
        Ok(()) => {}
        Err(LoadError::Cancelled) => {
            log::debug!("🧹 加载尝试 #{} 已被取代", generation);
        }
        Err(err) => {
            log::warn!(
                "❌ 加载尝试 #{} 失败（{:?}）：{}",
                generation,
                err.kind(),
                err
            );
            states.publish(generation, LoadState::Failed(err));
        }
    }
}
