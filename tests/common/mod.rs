//! Shared fixtures for the integration tests: synthetic frame sequences and a
//! scripted [`FrameSourceProvider`] whose sources can stall or fail on cue.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, RgbaImage};

use strobe_guard::{CoordinatorConfig, Frame, FrameError, FrameSource, FrameSourceProvider, SourceError, SourceHandle};

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 8;

pub const RED: [u8; 3] = [255, 0, 0];
pub const NEUTRAL: [u8; 3] = [128, 128, 128];

/// Frame period for a given rate.
pub fn period(fps: u64) -> Duration {
    Duration::from_nanos(1_000_000_000 / fps)
}

/// `count` frames of one flat color.
pub fn steady(count: u64, fps: u64, rgb: [u8; 3]) -> Vec<Frame> {
    (0..count)
        .map(|index| Frame::filled(index, period(fps) * index as u32, WIDTH, HEIGHT, rgb))
        .collect()
}

/// `count` frames alternating between two flat colors, starting with `first`.
pub fn alternating(count: u64, fps: u64, first: [u8; 3], second: [u8; 3]) -> Vec<Frame> {
    (0..count)
        .map(|index| {
            let rgb = if index % 2 == 0 { first } else { second };
            Frame::filled(index, period(fps) * index as u32, WIDTH, HEIGHT, rgb)
        })
        .collect()
}

pub fn gray(luminance: u8) -> [u8; 3] {
    [luminance; 3]
}

/// A coordinator configuration sized for tests.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        pool_size: 2,
        queue_capacity: 8,
        job_timeout: Duration::from_secs(5),
        ..CoordinatorConfig::default()
    }
}

/// Encodes flat-color frames as an animated GIF with a fixed per-frame delay.
pub fn gif(colors: &[[u8; 3]], delay_ms: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(Cursor::new(&mut bytes));
        encoder.set_repeat(Repeat::Infinite).expect("repeat is settable");
        for &[r, g, b] in colors {
            let buffer = RgbaImage::from_pixel(WIDTH, HEIGHT, image::Rgba([r, g, b, 255]));
            let frame = image::Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1));
            encoder.encode_frame(frame).expect("frame encodes");
        }
    }
    bytes
}

/// How a scripted source behaves once its frames run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    End,
    Stall,
    Fail,
    Panic,
}

#[derive(Debug, Clone)]
pub enum Script {
    Frames {
        frames: Vec<Result<Frame, FrameError>>,
        /// Async delay before each pull.
        pace: Duration,
        /// Blocking work before each pull; the frame is ready as soon as it is polled.
        work: Duration,
        tail: Tail,
    },
    Unsupported,
}

impl Script {
    pub fn frames(frames: Vec<Frame>) -> Self {
        Self::Frames {
            frames: frames.into_iter().map(Ok).collect(),
            pace: Duration::ZERO,
            work: Duration::ZERO,
            tail: Tail::End,
        }
    }

    pub fn stall() -> Self {
        Self::Frames {
            frames: Vec::new(),
            pace: Duration::ZERO,
            work: Duration::ZERO,
            tail: Tail::Stall,
        }
    }

    pub fn with_tail(mut self, new_tail: Tail) -> Self {
        if let Self::Frames { tail, .. } = &mut self {
            *tail = new_tail;
        }
        self
    }

    pub fn with_work(mut self, per_frame: Duration) -> Self {
        if let Self::Frames { work, .. } = &mut self {
            *work = per_frame;
        }
        self
    }
}

pub struct ScriptedSource {
    frames: VecDeque<Result<Frame, FrameError>>,
    pace: Duration,
    work: Duration,
    tail: Tail,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if !self.pace.is_zero() {
            tokio::time::sleep(self.pace).await;
        }
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }
        match self.frames.pop_front() {
            Some(frame) => frame.map(Some),
            None => match self.tail {
                Tail::End => Ok(None),
                Tail::Stall => std::future::pending().await,
                Tail::Fail => Err(SourceError::Unavailable("stream dropped".into()).into()),
                Tail::Panic => panic!("scripted source crashed"),
            },
        }
    }
}

/// Serves scripted sources by handle and records the order handles are opened in.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    scripts: Arc<HashMap<String, Script>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new<I, K>(scripts: I) -> Self
    where
        I: IntoIterator<Item = (K, Script)>,
        K: Into<String>,
    {
        Self {
            scripts: Arc::new(scripts.into_iter().map(|(key, script)| (key.into(), script)).collect()),
            opened: Arc::default(),
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("lock is not poisoned").clone()
    }
}

#[async_trait]
impl FrameSourceProvider for ScriptedProvider {
    type Source = ScriptedSource;

    async fn open(&self, handle: &SourceHandle) -> Result<Self::Source, SourceError> {
        self.opened.lock().expect("lock is not poisoned").push(handle.to_string());
        match self.scripts.get(handle.as_str()) {
            None => Err(SourceError::Unavailable(format!("unknown handle {handle}"))),
            Some(Script::Unsupported) => Err(SourceError::UnsupportedFormat("scripted".into())),
            Some(Script::Frames { frames, pace, work, tail }) => Ok(ScriptedSource {
                frames: frames.iter().cloned().collect(),
                pace: *pace,
                work: *work,
                tail: *tail,
            }),
        }
    }
}
