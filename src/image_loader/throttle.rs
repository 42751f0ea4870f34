//! # 帧推送节流
//!
//! ## 设计思路
//!
//! 增量解码每收到一块数据就可能产出一帧，网络慢或抖动时会让展示层频繁重绘。
//! 这里按固定窗口节流：窗口内最多推送一帧，被覆盖的中间帧直接丢弃（不排队），
//! 但最后一帧一定会在窗口结束时补发。
//!
//! ## 实现思路
//!
//! - 距上次推送已满一个窗口：立即推送，并丢弃更早的待发帧。
//! - 否则：覆盖待发帧；若尾沿任务未运行，则启动一个在 `上次推送 + 窗口` 时补发的任务。
//! - 推送在持锁状态下调用 sink，保证即时推送与尾沿补发之间不会乱序。
//! - 调度器随单次加载创建；`Drop` 时终止尾沿任务，被取代的加载不会再推送。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::Frame;

pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(20);

type FrameSink = Arc<dyn Fn(Frame) + Send + Sync>;

fn throttle_remaining(elapsed: Duration, interval: Duration) -> Option<Duration> {
    if elapsed >= interval {
        None
    } else {
        Some(interval - elapsed)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ThrottleDecision {
    ForwardNow,
    Defer {
        remaining: Duration,
        start_tail_worker: bool,
    },
}

fn decide_throttle_action(
    elapsed: Option<Duration>,
    interval: Duration,
    tail_worker_running: bool,
) -> ThrottleDecision {
    let Some(elapsed) = elapsed else {
        return ThrottleDecision::ForwardNow;
    };

    match throttle_remaining(elapsed, interval) {
        Some(remaining) => ThrottleDecision::Defer {
            remaining,
            start_tail_worker: !tail_worker_running,
        },
        None => ThrottleDecision::ForwardNow,
    }
}

#[derive(Default)]
struct ThrottleWindow {
    last_forward_at: Option<Instant>,
    pending: Option<Frame>,
    tail_worker_running: bool,
}

fn lock_window(window: &Mutex<ThrottleWindow>) -> MutexGuard<'_, ThrottleWindow> {
    match window.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("帧节流状态锁中毒，继续使用恢复数据");
            poisoned.into_inner()
        }
    }
}

/// 帧推送节流调度器。
pub struct ThrottledScheduler {
    interval: Duration,
    window: Arc<Mutex<ThrottleWindow>>,
    sink: FrameSink,
    tail_worker: Option<JoinHandle<()>>,
}

impl ThrottledScheduler {
    /// `sink` 是真正的消费者回调，只会在本调度器的节奏下被调用。
    ///
    /// 需在 Tokio 运行时内使用（尾沿补发依赖 `tokio::spawn`）。
    pub fn new<F>(interval: Duration, sink: F) -> Self
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        Self {
            interval,
            window: Arc::new(Mutex::new(ThrottleWindow::default())),
            sink: Arc::new(sink),
            tail_worker: None,
        }
    }

    /// 同步提交一帧（部分帧或最终帧）。
    pub fn deliver(&mut self, frame: Frame) {
        let now = Instant::now();
        let mut window = lock_window(&self.window);

        let elapsed = window
            .last_forward_at
            .map(|last| now.saturating_duration_since(last));

        match decide_throttle_action(elapsed, self.interval, window.tail_worker_running) {
            ThrottleDecision::ForwardNow => {
                window.last_forward_at = Some(now);
                window.pending = None;
                (self.sink)(frame);
            }
            ThrottleDecision::Defer {
                remaining,
                start_tail_worker,
            } => {
                log::trace!(
                    "⏱️ 帧推送节流：距上次推送不足 {}ms，{}ms 后尾沿补发",
                    self.interval.as_millis(),
                    remaining.as_millis()
                );
                window.pending = Some(frame);
                if start_tail_worker {
                    window.tail_worker_running = true;
                    drop(window);
                    self.spawn_tail_worker(remaining);
                }
            }
        }
    }

    /// 等待尾沿补发完成，保证最后一帧已推送。
    pub async fn finish(mut self) {
        if let Some(handle) = self.tail_worker.take() {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    log::warn!("⚠️ 帧尾沿补发任务异常结束：{}", err);
                }
            }
        }
    }

    /// 完全重置：丢弃待发帧、终止尾沿任务、清空计时。
    pub fn reset(&mut self) {
        if let Some(handle) = self.tail_worker.take() {
            handle.abort();
        }
        *lock_window(&self.window) = ThrottleWindow::default();
    }

    fn spawn_tail_worker(&mut self, initial_wait: Duration) {
        let window = Arc::clone(&self.window);
        let sink = Arc::clone(&self.sink);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut wait_for = initial_wait;

            loop {
                if !wait_for.is_zero() {
                    tokio::time::sleep(wait_for).await;
                }

                let now = Instant::now();
                let mut state = lock_window(&window);

                let Some(frame) = state.pending.take() else {
                    state.tail_worker_running = false;
                    break;
                };

                let elapsed = state
                    .last_forward_at
                    .map(|last| now.saturating_duration_since(last))
                    .unwrap_or(interval);

                if let Some(remaining) = throttle_remaining(elapsed, interval) {
                    state.pending = Some(frame);
                    wait_for = remaining;
                    drop(state);
                    continue;
                }

                state.last_forward_at = Some(now);
                state.tail_worker_running = false;
                sink(frame);
                break;
            }
        });

        self.tail_worker = Some(handle);
    }
}

impl Drop for ThrottledScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.tail_worker.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    type Forwarded = Arc<Mutex<Vec<(Instant, u32)>>>;

    fn frame(id: u32) -> Frame {
        Frame::partial(RgbaImage::new(id, 1))
    }

    fn recording_scheduler(interval: Duration) -> (ThrottledScheduler, Forwarded) {
        let forwarded: Forwarded = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&forwarded);
        let scheduler = ThrottledScheduler::new(interval, move |frame: Frame| {
            sink_log
                .lock()
                .expect("sink log poisoned")
                .push((Instant::now(), frame.width()));
        });
        (scheduler, forwarded)
    }

    fn ids(forwarded: &Forwarded) -> Vec<u32> {
        forwarded
            .lock()
            .expect("sink log poisoned")
            .iter()
            .map(|(_, id)| *id)
            .collect()
    }

    #[test]
    fn throttle_remaining_returns_expected_values() {
        let min = Duration::from_millis(20);
        assert_eq!(
            throttle_remaining(Duration::from_millis(5), min),
            Some(Duration::from_millis(15))
        );
        assert_eq!(throttle_remaining(Duration::from_millis(20), min), None);
        assert_eq!(throttle_remaining(Duration::from_millis(35), min), None);
    }

    #[test]
    fn first_frame_is_forwarded_immediately() {
        assert_eq!(
            decide_throttle_action(None, Duration::from_millis(20), false),
            ThrottleDecision::ForwardNow
        );
    }

    #[test]
    fn throttled_frame_starts_tail_worker_only_once() {
        assert_eq!(
            decide_throttle_action(
                Some(Duration::from_millis(5)),
                Duration::from_millis(20),
                false
            ),
            ThrottleDecision::Defer {
                remaining: Duration::from_millis(15),
                start_tail_worker: true,
            }
        );
        assert_eq!(
            decide_throttle_action(
                Some(Duration::from_millis(8)),
                Duration::from_millis(20),
                true
            ),
            ThrottleDecision::Defer {
                remaining: Duration::from_millis(12),
                start_tail_worker: false,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_coalesced_to_last_frame() {
        let (mut scheduler, forwarded) = recording_scheduler(DEFAULT_THROTTLE_INTERVAL);
        let start = Instant::now();

        for id in 1..=5 {
            scheduler.deliver(frame(id));
        }
        assert_eq!(ids(&forwarded), vec![1]);
        assert!(lock_window(&scheduler.window).pending.is_some());

        scheduler.finish().await;

        let log = forwarded.lock().expect("sink log poisoned").clone();
        assert_eq!(log.iter().map(|(_, id)| *id).collect::<Vec<_>>(), vec![1, 5]);
        assert_eq!(log[1].0 - start, DEFAULT_THROTTLE_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_frames_are_forwarded_without_delay() {
        let (mut scheduler, forwarded) = recording_scheduler(DEFAULT_THROTTLE_INTERVAL);

        for id in 1..=3 {
            scheduler.deliver(frame(id));
            tokio::time::advance(Duration::from_millis(25)).await;
        }
        scheduler.finish().await;

        assert_eq!(ids(&forwarded), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_are_at_least_one_interval_apart() {
        let (mut scheduler, forwarded) = recording_scheduler(DEFAULT_THROTTLE_INTERVAL);

        for id in 1..=30 {
            scheduler.deliver(frame(id));
            tokio::time::advance(Duration::from_millis(3)).await;
        }
        scheduler.finish().await;

        let log = forwarded.lock().expect("sink log poisoned").clone();
        for pair in log.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= DEFAULT_THROTTLE_INTERVAL);
            assert!(pair[1].1 > pair[0].1);
        }
        assert_eq!(log.last().map(|(_, id)| *id), Some(30));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_drops_pending_frame() {
        let (mut scheduler, forwarded) = recording_scheduler(DEFAULT_THROTTLE_INTERVAL);

        scheduler.deliver(frame(1));
        scheduler.deliver(frame(2));
        scheduler.reset();
        assert!(lock_window(&scheduler.window).pending.is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ids(&forwarded), vec![1]);

        scheduler.deliver(frame(3));
        scheduler.finish().await;
        assert_eq!(ids(&forwarded), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_scheduler_cancels_tail_forward() {
        let (mut scheduler, forwarded) = recording_scheduler(DEFAULT_THROTTLE_INTERVAL);

        scheduler.deliver(frame(1));
        scheduler.deliver(frame(2));
        drop(scheduler);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ids(&forwarded), vec![1]);
    }
}
