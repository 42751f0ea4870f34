#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_downsampling_image::image_loader::{
    ByteFetcher, ByteStream, Frame, ImageCodec, ImageSource, IncrementalDecoder, LoadError,
    LoadTarget, SizeSpec, StateTransition,
};
use bytes::Bytes;
use image::RgbaImage;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone)]
pub enum Step {
    Wait(Duration),
    Bytes(usize),
    Fail(LoadError),
}

#[derive(Debug, Clone)]
pub struct Script {
    pub open_error: Option<LoadError>,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn chunks(count: usize, chunk_len: usize, delay: Duration) -> Self {
        let mut steps = Vec::new();
        for _ in 0..count {
            steps.push(Step::Wait(delay));
            steps.push(Step::Bytes(chunk_len));
        }
        Self {
            open_error: None,
            steps,
        }
    }

    pub fn open_fails(error: LoadError) -> Self {
        Self {
            open_error: Some(error),
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

/// 按来源名回放预设字节序列的取数实现。
#[derive(Default, Clone)]
pub struct FakeFetcher {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
}

impl FakeFetcher {
    pub fn with(self, name: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .expect("script table poisoned")
            .insert(name.to_string(), script);
        self
    }
}

pub struct FakeStream {
    steps: VecDeque<Step>,
}

impl ByteFetcher for FakeFetcher {
    type Stream = FakeStream;

    async fn open(&self, source: &ImageSource) -> Result<FakeStream, LoadError> {
        let ImageSource::Url(name) = source else {
            return Err(LoadError::InvalidSource("fake fetcher only serves urls".to_string()));
        };
        let script = self
            .scripts
            .lock()
            .expect("script table poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::Network(format!("no script for {}", name)))?;

        if let Some(err) = script.open_error {
            return Err(err);
        }
        Ok(FakeStream {
            steps: script.steps.into(),
        })
    }
}

impl ByteStream for FakeStream {
    async fn next_bytes(&mut self) -> Result<Option<Bytes>, LoadError> {
        while let Some(step) = self.steps.pop_front() {
            match step {
                Step::Wait(delay) => tokio::time::sleep(delay).await,
                Step::Bytes(len) => return Ok(Some(Bytes::from(vec![7u8; len]))),
                Step::Fail(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

/// 帧宽度等于已解码字节数，便于断言。
#[derive(Debug, Default, Clone)]
pub struct FakeCodec {
    pub fail_final: bool,
}

pub struct FakeDecoder {
    fail_final: bool,
}

impl ImageCodec for FakeCodec {
    type Incremental = FakeDecoder;

    fn thumbnail(&self, bytes: &[u8], _max_pixel_size: u32) -> Result<Frame, LoadError> {
        if self.fail_final || bytes.is_empty() {
            return Err(LoadError::Decode("fake codec rejects payload".to_string()));
        }
        Ok(Frame::new(RgbaImage::new(bytes.len() as u32, 1)))
    }

    fn incremental(&self, _max_pixel_size: u32) -> FakeDecoder {
        FakeDecoder {
            fail_final: self.fail_final,
        }
    }
}

impl IncrementalDecoder for FakeDecoder {
    fn update(&mut self, cumulative: &[u8], is_final: bool) -> Result<Option<Frame>, LoadError> {
        if is_final {
            if self.fail_final || cumulative.is_empty() {
                return Err(LoadError::Decode("fake codec rejects payload".to_string()));
            }
            return Ok(Some(Frame::new(RgbaImage::new(cumulative.len() as u32, 1))));
        }
        if cumulative.is_empty() {
            return Ok(None);
        }
        Ok(Some(Frame::partial(RgbaImage::new(cumulative.len() as u32, 1))))
    }
}

pub fn target(name: &str) -> LoadTarget {
    LoadTarget::new(ImageSource::Url(name.to_string()), SizeSpec::width(160.0))
}

/// 记录接下来 `window` 时间内收到的全部状态变更。
pub async fn record(
    rx: &mut UnboundedReceiver<StateTransition>,
    window: Duration,
) -> Vec<(Instant, StateTransition)> {
    let deadline = Instant::now() + window;
    let mut seen = Vec::new();
    while let Ok(Some(transition)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        seen.push((Instant::now(), transition));
    }
    seen
}
