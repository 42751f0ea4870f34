//! # 分块读取模块
//!
//! 把传输层给出的任意大小数据块切成不超过 `chunk_bytes` 的小块，
//! 形成一个有限、不可重启、可在两次读取之间取消的惰性序列。
//!
//! - 每次读取前检查取消，被放弃的加载不会继续占用带宽。
//! - 空块或流结束即终止序列。
//! - 累计字节数超过上限立即失败。

use bytes::Bytes;

use super::{ByteStream, LoadError};

pub struct ChunkedReader<S> {
    stream: S,
    chunk_bytes: usize,
    max_bytes: u64,
    leftover: Bytes,
    received: u64,
    finished: bool,
}

impl<S: ByteStream> ChunkedReader<S> {
    pub fn new(stream: S, chunk_bytes: usize, max_bytes: u64) -> Self {
        Self {
            stream,
            chunk_bytes: chunk_bytes.max(1),
            max_bytes,
            leftover: Bytes::new(),
            received: 0,
            finished: false,
        }
    }

    /// 读取下一块（长度 `1..=chunk_bytes`），序列结束返回 `None`。
    pub async fn next_chunk<C>(&mut self, is_cancelled: &C) -> Result<Option<Bytes>, LoadError>
    where
        C: Fn() -> bool + Send + Sync,
    {
        if is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        if self.leftover.is_empty() {
            if self.finished {
                return Ok(None);
            }

            match self.stream.next_bytes().await? {
                Some(bytes) if !bytes.is_empty() => {
                    self.received = self.received.saturating_add(bytes.len() as u64);
                    if self.received > self.max_bytes {
                        return Err(LoadError::ResourceLimit(format!(
                            "下载内容超过大小限制（{:.2} MB）",
                            self.max_bytes as f64 / 1024.0 / 1024.0
                        )));
                    }
                    self.leftover = bytes;
                }
                _ => {
                    self.finished = true;
                    return Ok(None);
                }
            }

            if is_cancelled() {
                return Err(LoadError::Cancelled);
            }
        }

        let take = self.leftover.len().min(self.chunk_bytes);
        Ok(Some(self.leftover.split_to(take)))
    }

    /// 读完整条序列，供一次性解码路径使用。
    pub async fn read_to_end<C>(mut self, is_cancelled: &C) -> Result<Vec<u8>, LoadError>
    where
        C: Fn() -> bool + Send + Sync,
    {
        let initial_capacity = self
            .stream
            .size_hint()
            .map(|len| len.min(self.max_bytes).min(usize::MAX as u64) as usize)
            .unwrap_or(self.chunk_bytes);
        let mut buffer = Vec::with_capacity(initial_capacity);

        while let Some(chunk) = self.next_chunk(is_cancelled).await? {
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer)
    }

    /// 目前为止从传输层收到的总字节数。
    pub fn received_bytes(&self) -> u64 {
        self.received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ScriptedStream {
        chunks: VecDeque<Bytes>,
    }

    impl ScriptedStream {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect(),
            }
        }
    }

    impl ByteStream for ScriptedStream {
        async fn next_bytes(&mut self) -> Result<Option<Bytes>, LoadError> {
            Ok(self.chunks.pop_front())
        }
    }

    fn never() -> impl Fn() -> bool + Send + Sync {
        || false
    }

    #[tokio::test]
    async fn splits_transport_chunks_to_chunk_size() {
        let mut reader = ChunkedReader::new(ScriptedStream::new(&[b"abcdefg", b"hi"]), 3, 1024);
        let is_cancelled = never();

        let mut seen = Vec::new();
        while let Some(chunk) = reader.next_chunk(&is_cancelled).await.expect("read chunk") {
            assert!(chunk.len() <= 3);
            seen.push(chunk);
        }

        assert_eq!(seen, vec![&b"abc"[..], &b"def"[..], &b"g"[..], &b"hi"[..]]);
        assert_eq!(reader.received_bytes(), 9);
        assert!(reader.next_chunk(&is_cancelled).await.expect("after end").is_none());
    }

    #[tokio::test]
    async fn zero_length_read_terminates_sequence() {
        let mut reader = ChunkedReader::new(ScriptedStream::new(&[b"ab", b"", b"cd"]), 8, 1024);
        let is_cancelled = never();

        assert_eq!(
            reader.next_chunk(&is_cancelled).await.expect("first"),
            Some(Bytes::from_static(b"ab"))
        );
        assert_eq!(reader.next_chunk(&is_cancelled).await.expect("second"), None);
        assert_eq!(reader.next_chunk(&is_cancelled).await.expect("third"), None);
    }

    #[tokio::test]
    async fn cancellation_is_checked_between_reads() {
        let cancelled = AtomicBool::new(false);
        let is_cancelled = || cancelled.load(Ordering::SeqCst);
        let mut reader = ChunkedReader::new(ScriptedStream::new(&[b"abcd", b"efgh"]), 2, 1024);

        assert!(reader.next_chunk(&is_cancelled).await.expect("first").is_some());
        cancelled.store(true, Ordering::SeqCst);

        assert!(matches!(
            reader.next_chunk(&is_cancelled).await,
            Err(LoadError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn exceeding_max_bytes_fails() {
        let reader = ChunkedReader::new(ScriptedStream::new(&[b"abcd", b"efgh"]), 2, 6);

        assert!(matches!(
            reader.read_to_end(&never()).await,
            Err(LoadError::ResourceLimit(_))
        ));
    }

    #[tokio::test]
    async fn read_to_end_collects_everything() {
        let reader = ChunkedReader::new(ScriptedStream::new(&[b"hello ", b"world"]), 4, 1024);

        assert_eq!(
            reader.read_to_end(&never()).await.expect("read all"),
            b"hello world".to_vec()
        );
    }
}
