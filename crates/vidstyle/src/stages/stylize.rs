use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::bounded;
use image::{imageops, DynamicImage, ImageFormat, Rgb};
use tracing::{debug, info, warn};

use crate::config::{FramePolicy, StylizeConfig};
use crate::error::{StageError, StoreError};
use crate::stages::Stylizer;
use crate::storage::{ArtifactKind, ArtifactRef, ArtifactStore, StagedFrames};

/// Warm, saturated color grade with a slight softening blur.
pub struct ColorGradeStylizer {
    saturation: f32,
    brightness: f32,
    tint: [f32; 3],
    blur_sigma: f32,
}

impl ColorGradeStylizer {
    pub fn new(saturation: f32, brightness: f32, tint: [u8; 3], blur_sigma: f32) -> Self {
        Self {
            saturation,
            brightness,
            tint: tint.map(|c| c as f32 / 255.0),
            blur_sigma,
        }
    }

    pub fn from_config(config: &StylizeConfig) -> Self {
        Self::new(
            config.saturation,
            config.brightness,
            config.tint,
            config.blur_sigma,
        )
    }

    fn grade(&self, pixel: &mut Rgb<u8>) {
        let [r, g, b] = pixel.0.map(f32::from);
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;

        for (channel, tint) in pixel.0.iter_mut().zip(self.tint) {
            let value = f32::from(*channel);
            let saturated = luma + (value - luma) * self.saturation;
            *channel = (saturated * self.brightness * tint).round().clamp(0.0, 255.0) as u8;
        }
    }
}

impl Stylizer for ColorGradeStylizer {
    fn stylize(&self, frame: DynamicImage) -> Result<DynamicImage, StageError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(StageError::Stylize {
                index: 0,
                message: "frame has no pixels".to_string(),
            });
        }

        let mut rgb = frame.to_rgb8();
        for pixel in rgb.pixels_mut() {
            self.grade(pixel);
        }

        let graded = if self.blur_sigma > 0.0 {
            imageops::blur(&rgb, self.blur_sigma)
        } else {
            rgb
        };

        Ok(DynamicImage::ImageRgb8(graded))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StylizeOptions {
    pub policy: FramePolicy,
    pub max_attempts: u32,
    pub workers: usize,
}

impl StylizeOptions {
    pub fn from_config(config: &StylizeConfig) -> Self {
        Self {
            policy: config.policy,
            max_attempts: config.max_attempts.max(1),
            workers: config.workers.unwrap_or_else(num_cpus::get).max(1),
        }
    }
}

impl Default for StylizeOptions {
    fn default() -> Self {
        Self::from_config(&StylizeConfig::default())
    }
}

/// Committed output of the stylize stage.
#[derive(Debug, Clone)]
pub struct StylizedFrames {
    pub frames: Vec<ArtifactRef>,
    /// Indices that kept their unstyled original under the best-effort
    /// policy, ascending.
    pub substituted: Vec<usize>,
}

/// Runs a [`Stylizer`] over a frame sequence on a bounded set of scoped
/// worker threads, writing the results as the `StyledFrames` artifact.
pub struct StylizeStage {
    stylizer: Arc<dyn Stylizer>,
    options: StylizeOptions,
}

struct FrameRun<'a> {
    store: &'a ArtifactStore,
    abort: AtomicBool,
    done: AtomicUsize,
    substituted: Mutex<Vec<usize>>,
    first_error: Mutex<Option<StageError>>,
}

impl StylizeStage {
    pub fn new(stylizer: Arc<dyn Stylizer>, options: StylizeOptions) -> Self {
        Self { stylizer, options }
    }

    pub fn options(&self) -> StylizeOptions {
        self.options
    }

    /// Stylizes every frame. `on_progress(done, total)` is called from
    /// worker threads roughly every tenth of the sequence and at the end.
    pub fn run(
        &self,
        job_id: &str,
        frames: &[ArtifactRef],
        store: &ArtifactStore,
        on_progress: &(dyn Fn(usize, usize) + Sync),
    ) -> Result<StylizedFrames, StageError> {
        let total = frames.len();
        if total == 0 {
            return Err(StageError::Store(StoreError::Empty {
                artifact: format!("{}/{}", job_id, ArtifactKind::Frames.file_name()),
            }));
        }

        let staged = store.stage_frames(job_id, ArtifactKind::StyledFrames)?;
        let workers = self.options.workers.clamp(1, total);
        let step = total.div_ceil(10);
        debug!(frames = total, workers, "Stylizing frames");

        let run = FrameRun {
            store,
            abort: AtomicBool::new(false),
            done: AtomicUsize::new(0),
            substituted: Mutex::new(Vec::new()),
            first_error: Mutex::new(None),
        };

        let (sender, receiver) = bounded::<(usize, &ArtifactRef)>(workers * 2);

        thread::scope(|scope| {
            for _ in 0..workers {
                let receiver = receiver.clone();
                let run = &run;
                let staged = &staged;
                scope.spawn(move || {
                    for (index, frame) in receiver.iter() {
                        if run.abort.load(Ordering::Relaxed) {
                            continue;
                        }
                        if let Err(e) = self.process_frame(run, staged, index, frame) {
                            run.abort.store(true, Ordering::Relaxed);
                            let mut first = run
                                .first_error
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner());
                            first.get_or_insert(e);
                            continue;
                        }

                        let done = run.done.fetch_add(1, Ordering::Relaxed) + 1;
                        if done % step == 0 || done == total {
                            on_progress(done, total);
                        }
                    }
                });
            }
            drop(receiver);

            for (position, frame) in frames.iter().enumerate() {
                if run.abort.load(Ordering::Relaxed) {
                    break;
                }
                if sender.send((position + 1, frame)).is_err() {
                    break;
                }
            }
            drop(sender);
        });

        let FrameRun {
            substituted,
            first_error,
            ..
        } = run;

        if let Some(err) = first_error
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
        {
            return Err(err);
        }

        let mut substituted = substituted
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        substituted.sort_unstable();

        let styled = staged.commit()?;
        if styled.len() != total {
            return Err(StageError::Stylize {
                index: styled.len() + 1,
                message: format!("expected {} styled frames, found {}", total, styled.len()),
            });
        }

        if !substituted.is_empty() {
            warn!(
                count = substituted.len(),
                "Some frames kept their original look"
            );
        }
        info!(frames = total, "Stylized frames");

        Ok(StylizedFrames {
            frames: styled,
            substituted,
        })
    }

    fn process_frame(
        &self,
        run: &FrameRun<'_>,
        staged: &StagedFrames,
        index: usize,
        frame: &ArtifactRef,
    ) -> Result<(), StageError> {
        let original = run.store.read(frame)?;

        let mut last_error = None;
        for attempt in 1..=self.options.max_attempts {
            match self.stylize_bytes(index, &original) {
                Ok(encoded) => {
                    staged.write_frame(index, &encoded)?;
                    return Ok(());
                }
                Err(e) => {
                    warn!(frame = index, attempt, "Frame stylization failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| StageError::Stylize {
            index,
            message: "no attempts were made".to_string(),
        });

        match self.options.policy {
            FramePolicy::FailFast => Err(err),
            FramePolicy::BestEffort => {
                staged.write_frame(index, &original)?;
                run.substituted
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(index);
                Ok(())
            }
        }
    }

    fn stylize_bytes(&self, index: usize, original: &[u8]) -> Result<Vec<u8>, StageError> {
        let at_frame = |message: String| StageError::Stylize { index, message };

        let decoded = image::load_from_memory(original).map_err(|e| at_frame(e.to_string()))?;
        let styled = self.stylizer.stylize(decoded).map_err(|e| match e {
            StageError::Stylize { message, .. } => at_frame(message),
            other => at_frame(other.to_string()),
        })?;

        let mut encoded = Cursor::new(Vec::new());
        styled
            .write_to(&mut encoded, ImageFormat::Png)
            .map_err(|e| at_frame(e.to_string()))?;
        Ok(encoded.into_inner())
    }
}
