// THEORY:
// The frame source is the one stage that may block for a long time: decoding
// is CPU-bound codec work on arbitrary user media. It is therefore kept behind
// a trait seam, and the decoder that ships with the crate runs on a blocking
// thread that hands frames over a two-slot channel. The worker never holds
// more than one decoded frame of its own, and a slow decoder never stalls the
// async runtime.
//
// Sources are opened through a `FrameSourceProvider`, which resolves the
// opaque `SourceHandle` carried by a job. The provider decides what a handle
// means (a key into an in-memory store, a path, a cache entry); the core does
// not care.

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, ImageFormat};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::core_modules::pixel::{CHANNELS, Pixel};
use crate::error::{DecodeDefect, FrameError, SourceError};

/// Frames buffered between the decode thread and the worker.
const DECODE_CHANNEL_DEPTH: usize = 2;
/// Browsers render GIF delays of 10ms or less at this rate.
const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);
const MIN_FRAME_DELAY: Duration = Duration::from_millis(10);
/// The decoder gives up after this many unreadable frames in a row.
const MAX_CONSECUTIVE_DEFECTS: usize = 8;

/// One decoded RGBA8 raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position in the decoded sequence, starting at 0.
    pub index: u64,
    /// Offset of this frame into the media.
    pub timestamp: Duration,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * 4`.
    pub stride: usize,
    pub data: Vec<u8>,
}

impl Frame {
    /// A tightly packed RGBA frame.
    pub fn from_rgba(index: u64, timestamp: Duration, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            index,
            timestamp,
            width,
            height,
            stride: width as usize * CHANNELS,
            data,
        }
    }

    /// A frame filled with one opaque color.
    pub fn filled(index: u64, timestamp: Duration, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixel = [rgb[0], rgb[1], rgb[2], u8::MAX];
        let data = pixel.repeat(width as usize * height as usize);
        Self::from_rgba(index, timestamp, width, height, data)
    }

    /// Reads the pixel at `(x, y)`. The caller guarantees the layout is valid.
    pub fn pixel(&self, x: usize, y: usize) -> Pixel {
        let offset = y * self.stride + x * CHANNELS;
        Pixel::new(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        )
    }
}

/// Opaque reference to a piece of media, resolved by a [`FrameSourceProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceHandle(String);

impl SourceHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceHandle {
    fn from(handle: &str) -> Self {
        Self::new(handle)
    }
}

impl From<String> for SourceHandle {
    fn from(handle: String) -> Self {
        Self(handle)
    }
}

/// A stream of frames in strictly increasing timestamp order.
#[async_trait]
pub trait FrameSource: Send {
    /// The next frame, `Ok(None)` at end of stream.
    ///
    /// A [`FrameError::Defect`] means one frame was unreadable and the stream
    /// continues. A [`FrameError::Source`] ends the stream.
    async fn next_frame(&mut self) -> Result<Option<Frame>, FrameError>;
}

/// Resolves source handles into frame sources.
#[async_trait]
pub trait FrameSourceProvider: Send + Sync + 'static {
    type Source: FrameSource + 'static;

    async fn open(&self, handle: &SourceHandle) -> Result<Self::Source, SourceError>;
}

/// Decodes GIF, animated PNG, animated WebP and still images with the `image` crate.
///
/// Animations yield one frame per animation frame, timestamped by the
/// cumulative frame delay. Still images yield a single frame at zero.
pub struct ImageFrameSource {
    receiver: mpsc::Receiver<Result<Frame, FrameError>>,
}

impl ImageFrameSource {
    /// Starts decoding `bytes` on a blocking thread.
    ///
    /// Resolves once the container header has been parsed, so an unknown or
    /// unreadable format fails here rather than on the first frame.
    pub async fn decode(bytes: Arc<[u8]>) -> Result<Self, SourceError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (frame_tx, receiver) = mpsc::channel(DECODE_CHANNEL_DEPTH);

        tokio::task::spawn_blocking(move || decode_into(bytes, ready_tx, frame_tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self { receiver }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SourceError::UnsupportedFormat("decoder stopped before reading the header".into())),
        }
    }
}

#[async_trait]
impl FrameSource for ImageFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        self.receiver.recv().await.transpose()
    }
}

type FrameSender = mpsc::Sender<Result<Frame, FrameError>>;

fn decode_into(bytes: Arc<[u8]>, ready: oneshot::Sender<Result<(), SourceError>>, frames: FrameSender) {
    let format = match image::guess_format(&bytes) {
        Ok(format) => format,
        Err(err) => {
            let _ = ready.send(Err(SourceError::UnsupportedFormat(err.to_string())));
            return;
        }
    };

    let animation = match open_animation(format, Cursor::new(bytes.clone())) {
        Ok(animation) => animation,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    match animation {
        Some(animation) => {
            let _ = ready.send(Ok(()));
            stream_animation(animation, &frames);
        }
        None => match image::load_from_memory_with_format(&bytes, format) {
            Ok(still) => {
                let _ = ready.send(Ok(()));
                let rgba = still.into_rgba8();
                let (width, height) = rgba.dimensions();
                let _ = frames.blocking_send(Ok(Frame::from_rgba(0, Duration::ZERO, width, height, rgba.into_raw())));
            }
            Err(err) => {
                let _ = ready.send(Err(SourceError::UnsupportedFormat(err.to_string())));
            }
        },
    }
}

/// Returns the frame iterator for animated containers, `None` for still images.
fn open_animation(format: ImageFormat, reader: Cursor<Arc<[u8]>>) -> Result<Option<image::Frames<'static>>, SourceError> {
    let unsupported = |err: image::ImageError| SourceError::UnsupportedFormat(err.to_string());

    let frames = match format {
        ImageFormat::Gif => Some(GifDecoder::new(reader).map_err(unsupported)?.into_frames()),
        ImageFormat::Png => {
            let mut decoder = PngDecoder::new(reader).map_err(unsupported)?;
            if decoder.is_apng().map_err(unsupported)? {
                Some(decoder.apng().map_err(unsupported)?.into_frames())
            } else {
                None
            }
        }
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(reader).map_err(unsupported)?;
            decoder.has_animation().then(|| decoder.into_frames())
        }
        _ => None,
    };
    Ok(frames)
}

fn stream_animation(animation: image::Frames<'static>, frames: &FrameSender) {
    let mut timestamp = Duration::ZERO;
    let mut consecutive_defects = 0;

    for (index, decoded) in animation.enumerate() {
        let index = index as u64;
        let message = match decoded {
            Ok(decoded) => {
                consecutive_defects = 0;
                let (numer, denom) = decoded.delay().numer_denom_ms();
                let delay = if denom == 0 {
                    DEFAULT_FRAME_DELAY
                } else {
                    Duration::from_nanos(numer as u64 * 1_000_000 / denom as u64)
                };
                let buffer = decoded.into_buffer();
                let (width, height) = buffer.dimensions();
                let frame = Frame::from_rgba(index, timestamp, width, height, buffer.into_raw());
                timestamp += if delay <= MIN_FRAME_DELAY { DEFAULT_FRAME_DELAY } else { delay };
                Ok(frame)
            }
            Err(err) => {
                consecutive_defects += 1;
                Err(FrameError::Defect(DecodeDefect::Corrupt { index, reason: err.to_string() }))
            }
        };

        // A closed channel means the job was cancelled or timed out.
        if frames.blocking_send(message).is_err() || consecutive_defects >= MAX_CONSECUTIVE_DEFECTS {
            return;
        }
    }
}

/// A [`FrameSourceProvider`] over media blobs held in memory, keyed by handle.
///
/// The calling layer downloads or reads the media, inserts it, and submits a
/// job carrying the same handle.
#[derive(Clone, Default)]
pub struct MediaStore {
    media: Arc<RwLock<HashMap<SourceHandle, Arc<[u8]>>>>,
}

impl MediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: impl Into<SourceHandle>, bytes: impl Into<Arc<[u8]>>) {
        self.media.write().await.insert(handle.into(), bytes.into());
    }

    pub async fn remove(&self, handle: &SourceHandle) -> bool {
        self.media.write().await.remove(handle).is_some()
    }

    pub async fn contains(&self, handle: &SourceHandle) -> bool {
        self.media.read().await.contains_key(handle)
    }
}

#[async_trait]
impl FrameSourceProvider for MediaStore {
    type Source = ImageFrameSource;

    async fn open(&self, handle: &SourceHandle) -> Result<Self::Source, SourceError> {
        let bytes = self
            .media
            .read()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| SourceError::Unavailable(format!("no media stored for handle {handle}")))?;

        ImageFrameSource::decode(bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::utils::image_helper::{encode_gif, encode_png};

    async fn drain(source: &mut ImageFrameSource) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame().await.expect("frame decodes") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn filled_frame_is_tightly_packed() {
        let frame = Frame::filled(0, Duration::ZERO, 3, 2, [1, 2, 3]);
        assert_eq!(frame.stride, 12);
        assert_eq!(frame.data.len(), 24);
        assert_eq!(frame.pixel(2, 1), Pixel::new(1, 2, 3, 255));
    }

    #[tokio::test]
    async fn gif_frames_follow_cumulative_delays() {
        let bytes = encode_gif(&[[0, 0, 0], [255, 255, 255], [0, 0, 0]], 8, 8, 50);
        let mut source = ImageFrameSource::decode(bytes.into()).await.expect("gif opens");
        let frames = drain(&mut source).await;

        assert_eq!(frames.len(), 3);
        let timestamps: Vec<_> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(
            timestamps,
            vec![Duration::ZERO, Duration::from_millis(50), Duration::from_millis(100)]
        );
        assert_eq!(frames[1].index, 1);
        assert_eq!((frames[1].width, frames[1].height), (8, 8));
        assert!(frames[1].pixel(4, 4).luminance() > 200.0);
    }

    #[tokio::test]
    async fn still_png_is_a_single_frame() {
        let bytes = encode_png([10, 200, 10], 6, 4);
        let mut source = ImageFrameSource::decode(bytes.into()).await.expect("png opens");
        let frames = drain(&mut source).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp, Duration::ZERO);
        assert_eq!(frames[0].pixel(0, 0), Pixel::new(10, 200, 10, 255));
    }

    #[tokio::test]
    async fn unknown_bytes_are_unsupported() {
        let result = ImageFrameSource::decode(Arc::from(&b"definitely not media"[..])).await;
        assert!(matches!(result, Err(SourceError::UnsupportedFormat(_))));
    }

    #[tokio::test]
    async fn store_reports_missing_handles() {
        let store = MediaStore::new();
        let result = store.open(&SourceHandle::from("missing")).await;
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn store_opens_inserted_media() {
        let store = MediaStore::new();
        store.insert("clip", encode_gif(&[[0, 0, 0], [90, 90, 90]], 4, 4, 100)).await;
        assert!(store.contains(&SourceHandle::from("clip")).await);

        let mut source = store.open(&SourceHandle::from("clip")).await.expect("clip opens");
        assert_eq!(drain(&mut source).await.len(), 2);

        assert!(store.remove(&SourceHandle::from("clip")).await);
        assert!(!store.contains(&SourceHandle::from("clip")).await);
    }
}
