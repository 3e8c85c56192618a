//! Deterministic executors standing in for the network and ffmpeg.
//!
//! Frames are 4x4 PNGs whose first pixel encodes the frame index
//! (red = index % 256, green = index / 256), so every stage can check
//! ordering without external tools.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use url::Url;

use vidstyle::error::{StageError, StoreError};
use vidstyle::stages::{Downloader, ExtractedFrames, FrameExtractor, Reassembler, Stylizer};
use vidstyle::storage::{ArtifactKind, ArtifactRef, ArtifactStore};

pub const FAKE_FRAME_RATE: f64 = 12.5;

/// Frame count a test URL asks for: `https://videos.test/clip-7.mp4` has 7.
pub fn frames_for_url(url: &str) -> usize {
    url.rsplit('/')
        .next()
        .and_then(|name| name.strip_prefix("clip-"))
        .and_then(|name| name.strip_suffix(".mp4"))
        .and_then(|count| count.parse().ok())
        .unwrap_or(3)
}

pub fn frame_png(index: usize) -> Vec<u8> {
    let image = RgbImage::from_pixel(4, 4, Rgb([(index % 256) as u8, (index / 256) as u8, 0]));
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// Returns the encoded frame index and the blue channel of the first pixel.
pub fn decode_frame(image: &DynamicImage) -> (usize, u8) {
    let pixel = image.to_rgb8().get_pixel(0, 0).0;
    (pixel[0] as usize + pixel[1] as usize * 256, pixel[2])
}

/// Consumes one unit of `budget`; true if there was one.
fn take_one(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Writes a small text "video" naming the frame count and the URL.
#[derive(Default)]
pub struct FakeDownloader {
    pub failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl Downloader for FakeDownloader {
    fn run(
        &self,
        job_id: &str,
        source: &Url,
        store: &ArtifactStore,
    ) -> Result<ArtifactRef, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failures) {
            return Err(StageError::Fetch("HTTP 503 Service Unavailable".to_string()));
        }

        let body = format!("{}\n{}\n", frames_for_url(source.as_str()), source);
        Ok(store.put(job_id, ArtifactKind::Source, body.as_bytes())?)
    }
}

#[derive(Default)]
pub struct FakeExtractor {
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FrameExtractor for FakeExtractor {
    fn run(
        &self,
        job_id: &str,
        source: &ArtifactRef,
        store: &ArtifactStore,
    ) -> Result<ExtractedFrames, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let body = String::from_utf8(store.read(source)?)
            .map_err(|e| StageError::Decode(e.to_string()))?;
        let count: usize = body
            .lines()
            .next()
            .and_then(|line| line.parse().ok())
            .ok_or_else(|| StageError::Decode("unsupported container".to_string()))?;

        let staged = store.stage_frames(job_id, ArtifactKind::Frames)?;
        for index in 1..=count {
            staged.write_frame(index, &frame_png(index))?;
        }
        let frames = staged.commit()?;

        Ok(ExtractedFrames {
            frames,
            frame_rate: FAKE_FRAME_RATE,
        })
    }
}

/// Sets the blue channel to 255. Frames listed in `always_fail` never
/// succeed; `transient_failures` fails that many calls before recovering.
#[derive(Default)]
pub struct FlakyStylizer {
    pub always_fail: HashSet<usize>,
    pub transient_failures: AtomicUsize,
}

impl FlakyStylizer {
    pub fn failing(indices: &[usize]) -> Self {
        Self {
            always_fail: indices.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn transient(failures: usize) -> Self {
        Self {
            transient_failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }
}

impl Stylizer for FlakyStylizer {
    fn stylize(&self, frame: DynamicImage) -> Result<DynamicImage, StageError> {
        let (index, _) = decode_frame(&frame);
        if self.always_fail.contains(&index) || take_one(&self.transient_failures) {
            return Err(StageError::Stylize {
                index,
                message: "model returned no output".to_string(),
            });
        }

        let mut image = frame.to_rgb8();
        for pixel in image.pixels_mut() {
            pixel.0[2] = 255;
        }
        Ok(DynamicImage::ImageRgb8(image))
    }
}

/// Writes one line per frame instead of encoding video.
#[derive(Default)]
pub struct TextReassembler {
    pub delay: Option<Duration>,
}

impl Reassembler for TextReassembler {
    fn run(
        &self,
        job_id: &str,
        frames: &[ArtifactRef],
        frame_rate: f64,
        store: &ArtifactStore,
    ) -> Result<ArtifactRef, StageError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let mut staged = store.stage(job_id, ArtifactKind::Output)?;
        let path = staged.path().to_path_buf();
        let write_err = |source: std::io::Error| {
            StageError::Store(StoreError::WriteFile {
                path: path.clone(),
                source,
            })
        };

        writeln!(staged.writer(), "fps {}", frame_rate).map_err(write_err)?;
        for frame in frames {
            let image = image::load_from_memory(&store.read(frame)?)
                .map_err(|e| StageError::Encode(e.to_string()))?;
            let (index, blue) = decode_frame(&image);
            writeln!(staged.writer(), "frame {} blue {}", index, blue).map_err(write_err)?;
        }

        Ok(staged.commit()?)
    }
}
