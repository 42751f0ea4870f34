//! # 加载状态机
//!
//! ## 设计思路
//!
//! 展示层只观察一个值：当前 `LoadState`。所有写入都经过同一把锁串行化，
//! 并在锁内按世代号（generation）校验：被取代的加载尝试即使晚到，也写不进来。
//!
//! ## 实现思路
//!
//! - 世代号用 `AtomicU64` 暴露给在途任务做廉价的取消检查，
//!   同时在锁内保存一份，发布时以锁内值为准。
//! - 订阅者通过无界通道接收 `StateTransition`，顺序与写入顺序一致；
//!   已关闭的订阅者在下一次发布时清理。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::{Frame, LoadError};

/// 展示层可见的加载状态。
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoadState {
    /// 没有目标。
    #[default]
    Idle,
    /// 首次加载中，尚无可显示内容。
    Loading,
    /// 重新加载中，旧帧继续显示。
    Reloading(Frame),
    /// 加载失败（每次尝试最多一次）。
    Failed(LoadError),
    /// 有可显示的帧；增量模式下会多次进入本状态。
    Loaded(Frame),
}

impl LoadState {
    /// 当前可显示的帧（`Loaded` / `Reloading`）。
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Self::Loaded(frame) | Self::Reloading(frame) => Some(frame),
            _ => None,
        }
    }

    /// 新尝试开始时的状态：有帧则保留为 `Reloading`，否则 `Loading`。
    pub fn begin_attempt(&self) -> LoadState {
        match self.frame() {
            Some(frame) => Self::Reloading(frame.clone()),
            None => Self::Loading,
        }
    }
}

/// 推送给订阅者的一次状态变更。
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub generation: u64,
    pub state: LoadState,
}

struct StateInner {
    generation: u64,
    state: LoadState,
    subscribers: Vec<UnboundedSender<StateTransition>>,
}

impl StateInner {
    fn set(&mut self, state: LoadState) {
        self.state = state;
        let transition = StateTransition {
            generation: self.generation,
            state: self.state.clone(),
        };
        self.subscribers
            .retain(|subscriber| subscriber.send(transition.clone()).is_ok());
    }
}

pub(crate) struct LoadStateCell {
    generation: AtomicU64,
    inner: Mutex<StateInner>,
}

impl LoadStateCell {
    pub(crate) fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            inner: Mutex::new(StateInner {
                generation: 0,
                state: LoadState::Idle,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("加载状态锁中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    /// 无锁读取当前世代号，供在途任务判断自己是否已被取代。
    pub(crate) fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> LoadState {
        self.lock().state.clone()
    }

    pub(crate) fn subscribe(&self) -> UnboundedReceiver<StateTransition> {
        let (tx, rx) = unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    fn bump(&self, inner: &mut StateInner) -> u64 {
        inner.generation = inner.generation.wrapping_add(1);
        self.generation.store(inner.generation, Ordering::Release);
        inner.generation
    }

    /// 开始新尝试：递增世代并发布 `Loading` / `Reloading`，返回新世代号。
    pub(crate) fn begin_attempt(&self) -> u64 {
        let mut inner = self.lock();
        let generation = self.bump(&mut inner);
        let next = inner.state.begin_attempt();
        inner.set(next);
        generation
    }

    /// 清空目标：递增世代并发布 `Idle`。
    pub(crate) fn reset_to_idle(&self) {
        let mut inner = self.lock();
        self.bump(&mut inner);
        inner.set(LoadState::Idle);
    }

    /// 只递增世代、不发布任何状态（销毁时使用）。
    pub(crate) fn invalidate(&self) {
        let mut inner = self.lock();
        self.bump(&mut inner);
    }

    /// 以 `generation` 身份发布状态；世代已过期则丢弃并返回 `false`。
    pub(crate) fn publish(&self, generation: u64, state: LoadState) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            log::debug!(
                "🧹 丢弃过期状态：generation={}，当前={}",
                generation,
                inner.generation
            );
            return false;
        }
        inner.set(state);
        true
    }
}
