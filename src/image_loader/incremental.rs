//! # 增量解码路径
//!
//! ## 设计思路
//!
//! 数据边到边解：每收到一块就把“目前为止的全部字节”交给增量解码器，
//! 能出图就推一帧（经节流调度器），不能出图就继续等下一块。
//!
//! ## 实现思路
//!
//! - `StreamSession` 累积字节并记录“是否出过帧”。
//! - 中间轮次的解码失败一律吞掉（数据还没到齐是常态）。
//! - 最终轮次失败：从未出过帧才算失败；已有部分帧时保留最后一帧，只记警告。
//! - 每轮解码在阻塞线程上执行，轮前检查取消。

use std::time::Instant;

use super::{
    ByteFetcher, ChunkedReader, Frame, ImageCodec, ImageSource, IncrementalDecoder, LoadError,
    LoadPipeline, SizeSpec, ThrottledScheduler,
};

/// 单次增量加载的解码会话。
pub struct StreamSession<D> {
    buffer: Vec<u8>,
    decoder: D,
    produced_frame: bool,
}

impl<D: IncrementalDecoder> StreamSession<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            buffer: Vec::new(),
            decoder,
            produced_frame: false,
        }
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// 用累计字节跑一轮解码。
    ///
    /// 非最终轮次永远不会返回错误。
    pub fn feed(&mut self, is_final: bool) -> Result<Option<Frame>, LoadError> {
        match self.decoder.update(&self.buffer, is_final) {
            Ok(Some(frame)) => {
                self.produced_frame = true;
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(err) if !is_final => {
                log::debug!(
                    "⏳ 部分数据解码失败（{} bytes），等待更多数据：{}",
                    self.buffer.len(),
                    err
                );
                Ok(None)
            }
            Err(err) if self.produced_frame => {
                log::warn!("⚠️ 最终解码失败，保留最后一帧部分图像：{}", err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

}

async fn feed_blocking<D>(
    mut session: StreamSession<D>,
    is_final: bool,
) -> Result<(StreamSession<D>, Result<Option<Frame>, LoadError>), LoadError>
where
    D: IncrementalDecoder + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = session.feed(is_final);
        (session, result)
    })
    .await
    .map_err(|e| LoadError::Decode(format!("解码任务异常结束：{}", e)))
}

impl<F, C> LoadPipeline<F, C>
where
    F: ByteFetcher,
    C: ImageCodec,
{
    /// 边下载边解码，每一帧交给 `scheduler` 按节奏推送。
    ///
    /// 返回 `Ok(())` 时调用方应 `finish()` 调度器，确保最后一帧已推送。
    pub async fn stream_incremental<Cx>(
        &self,
        source: &ImageSource,
        size: &SizeSpec,
        is_cancelled: &Cx,
        scheduler: &mut ThrottledScheduler,
    ) -> Result<(), LoadError>
    where
        Cx: Fn() -> bool + Send + Sync,
    {
        let total_start = Instant::now();
        let max_pixel_size = size.resolve().max_pixel_size();
        log::info!(
            "🌐 开始增量加载：{}（max_pixel_size={}, chunk={} bytes）",
            source.describe(),
            max_pixel_size,
            self.config.chunk_bytes
        );

        let stream = self.fetcher.open(source).await?;
        let mut reader =
            ChunkedReader::new(stream, self.config.chunk_bytes, self.config.max_file_size);
        let mut session = StreamSession::new(self.codec.incremental(max_pixel_size));
        let mut passes = 0usize;
        let mut frames = 0usize;

        loop {
            let chunk = reader.next_chunk(is_cancelled).await?;
            let is_final = chunk.is_none();
            if let Some(chunk) = &chunk {
                session.append(chunk);
            }

            if is_cancelled() {
                return Err(LoadError::Cancelled);
            }

            let (returned, result) = feed_blocking(session, is_final).await?;
            session = returned;
            passes += 1;

            if let Some(frame) = result? {
                frames += 1;
                log::debug!(
                    "🖼️ 第 {} 轮解码出帧：{}x{}（{} bytes, complete={}）",
                    passes,
                    frame.width(),
                    frame.height(),
                    session.buffered_len(),
                    frame.is_complete()
                );
                scheduler.deliver(frame);
            }

            if is_final {
                break;
            }
        }

        log::info!(
            "✅ 增量加载完成：{} bytes，{} 轮解码，{} 帧（total={}ms）",
            reader.received_bytes(),
            passes,
            frames,
            total_start.elapsed().as_millis()
        );

        Ok(())
    }
}
