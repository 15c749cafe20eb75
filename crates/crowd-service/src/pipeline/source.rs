use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use common::video::FrameReader;
use image::RgbImage;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;

/// Ordered supply of decoded frames for one session. Dropping a source
/// releases it; decoder processes are killed on drop.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` when the source is exhausted.
    async fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

#[async_trait]
impl FrameSource for FrameReader {
    async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        FrameReader::next_frame(self).await
    }
}

/// Frames held in memory, mostly for tests and demos.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<RgbImage>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = RgbImage>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }
}

/// Frames pushed by a client; ends when every sender is dropped.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<RgbImage>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<RgbImage>) -> Self {
        Self { rx }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<RgbImage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.rx.recv().await)
    }
}

/// A source whose first frame has already been read, proving it opened.
pub struct PrimedSource<S> {
    first: Option<RgbImage>,
    inner: S,
}

impl<S: FrameSource> PrimedSource<S> {
    /// Read the first frame within `timeout`. Fails when the source yields
    /// nothing, errors, or stalls; the source is dropped in that case.
    pub async fn open(mut inner: S, timeout: Duration) -> Result<Self> {
        let first = tokio::time::timeout(timeout, inner.next_frame())
            .await
            .map_err(|_| anyhow!("no frame within {:?}", timeout))?
            .context("failed to read first frame")?
            .ok_or_else(|| anyhow!("source ended before its first frame"))?;
        Ok(Self {
            first: Some(first),
            inner,
        })
    }
}

#[async_trait]
impl<S: FrameSource> FrameSource for PrimedSource<S> {
    async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.first.take() {
            Some(frame) => Ok(Some(frame)),
            None => self.inner.next_frame().await,
        }
    }
}
