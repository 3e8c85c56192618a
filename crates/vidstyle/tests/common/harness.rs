//! Isolated pipeline wiring for integration tests.
//!
//! Each `TestHarness` owns a temporary work directory and a controller
//! built from the fake executors in `fakes`.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use vidstyle::config::FramePolicy;
use vidstyle::job::JobTracker;
use vidstyle::pipeline::{PipelineController, PipelineSettings};
use vidstyle::stages::Executors;
use vidstyle::storage::{ArtifactKind, ArtifactStore};

use super::fakes::{FakeDownloader, FakeExtractor, FlakyStylizer, TextReassembler};

/// Options for building a harness. Defaults run every stage cleanly.
#[derive(Default)]
pub struct HarnessOptions {
    pub policy: FramePolicy,
    pub max_attempts: u32,
    pub stylize_workers: usize,
    pub download_failures: usize,
    pub extract_delay: Option<Duration>,
    pub reassemble_delay: Option<Duration>,
    pub stylizer: Option<FlakyStylizer>,
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub controller: Arc<PipelineController>,
    pub downloader: Arc<FakeDownloader>,
    pub extractor: Arc<FakeExtractor>,
    executors: Executors,
    settings: PipelineSettings,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");

        let mut settings = PipelineSettings::with_work_directory(temp_dir.path());
        settings.stylize.policy = options.policy;
        settings.stylize.max_attempts = options.max_attempts.max(1);
        settings.stylize.workers = if options.stylize_workers == 0 {
            4
        } else {
            options.stylize_workers
        };

        let downloader = Arc::new(FakeDownloader::default());
        downloader
            .failures
            .store(options.download_failures, std::sync::atomic::Ordering::SeqCst);
        let extractor = Arc::new(FakeExtractor {
            delay: options.extract_delay,
            ..FakeExtractor::default()
        });

        let executors = Executors {
            downloader: downloader.clone(),
            extractor: extractor.clone(),
            stylizer: Arc::new(options.stylizer.unwrap_or_default()),
            reassembler: Arc::new(TextReassembler {
                delay: options.reassemble_delay,
            }),
        };

        let controller = Arc::new(build_controller(
            temp_dir.path(),
            settings.clone(),
            executors.clone(),
        ));

        Self {
            temp_dir,
            controller,
            downloader,
            extractor,
            executors,
            settings,
        }
    }

    pub fn work_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A fresh controller with an empty tracker over the same work
    /// directory, as after a process restart.
    pub fn restart(&self) -> PipelineController {
        build_controller(
            self.temp_dir.path(),
            self.settings.clone(),
            self.executors.clone(),
        )
    }

    pub fn store(&self) -> &ArtifactStore {
        self.controller.store()
    }

    /// Lines of the reassembled output of `job_id`.
    pub fn output_lines(&self, job_id: &str) -> Vec<String> {
        let data = self
            .store()
            .get(job_id, ArtifactKind::Output)
            .expect("Failed to read output");
        String::from_utf8(data)
            .expect("Output is not UTF-8")
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Expected output lines for `count` frames stylized without failures.
    pub fn expected_lines(count: usize, substituted: &[usize]) -> Vec<String> {
        let mut lines = vec![format!("fps {}", super::fakes::FAKE_FRAME_RATE)];
        for index in 1..=count {
            let blue = if substituted.contains(&index) { 0 } else { 255 };
            lines.push(format!("frame {} blue {}", index, blue));
        }
        lines
    }
}

fn build_controller(
    work_dir: &Path,
    settings: PipelineSettings,
    executors: Executors,
) -> PipelineController {
    let store = ArtifactStore::new(work_dir);
    store.init().expect("Failed to init store");
    PipelineController::new(settings, Arc::new(JobTracker::new()), Arc::new(store), executors)
}
