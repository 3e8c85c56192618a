//! End-to-end tests for the stage pipeline, driven through the controller
//! with fake executors.

mod common;

use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use common::{FlakyStylizer, HarnessOptions, TestHarness};
use vidstyle::config::FramePolicy;
use vidstyle::error::ErrorKind;
use vidstyle::events::JobStatus;
use vidstyle::job::Stage;
use vidstyle::storage::ArtifactKind;
use vidstyle::worker::{StageRequest, StageResponse, WorkerPool};

const CLIP_5: &str = "https://videos.test/clip-5.mp4";

fn wait_until_active(harness: &TestHarness, job_id: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !harness.controller.tracker().is_active(job_id) {
        assert!(Instant::now() < deadline, "stage never started");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_end_to_end_four_stages() {
    let harness = TestHarness::new();
    let controller = &harness.controller;

    let job_id = controller.download(CLIP_5).unwrap().job_id;
    assert_eq!(controller.status(&job_id).unwrap().stage, Stage::Downloaded);

    let extracted = controller.extract_frames(&job_id).unwrap();
    assert_eq!(extracted.job_id, job_id);
    assert_eq!(extracted.frame_count, 5);

    let stylized = controller.stylize_frames(&job_id).unwrap();
    assert_eq!(stylized.frame_count, 5);
    assert!(stylized.substituted_frames.is_empty());

    let reassembled = controller.reassemble(&job_id).unwrap();
    assert_eq!(reassembled.download_ref, format!("{}/output.mp4", job_id));

    let status = controller.status(&job_id).unwrap();
    assert_eq!(status.stage, Stage::Reassembled);
    assert_eq!(status.frame_count, Some(5));
    assert_eq!(status.download_ref, Some(reassembled.download_ref));
    assert!(status.error.is_none());

    assert_eq!(
        harness.output_lines(&job_id),
        TestHarness::expected_lines(5, &[])
    );
}

#[test]
fn test_status_serializes_with_stable_names() {
    let harness = TestHarness::new();
    let job_id = harness.controller.process(CLIP_5).unwrap().job_id;

    let json = serde_json::to_value(harness.controller.status(&job_id).unwrap()).unwrap();
    assert_eq!(json["jobId"], job_id.as_str());
    assert_eq!(json["stage"], "Reassembled");
    assert_eq!(json["frameCount"], 5);
    assert_eq!(json["downloadRef"], format!("{}/output.mp4", job_id));
}

#[test]
fn test_frame_order_preserved_with_many_workers() {
    let harness = TestHarness::with_options(HarnessOptions {
        stylize_workers: 8,
        ..HarnessOptions::default()
    });
    let controller = &harness.controller;

    let job_id = controller.download("https://videos.test/clip-300.mp4").unwrap().job_id;
    assert_eq!(controller.extract_frames(&job_id).unwrap().frame_count, 300);
    assert_eq!(controller.stylize_frames(&job_id).unwrap().frame_count, 300);
    controller.reassemble(&job_id).unwrap();

    assert_eq!(
        harness.output_lines(&job_id),
        TestHarness::expected_lines(300, &[])
    );
}

#[test]
fn test_out_of_order_calls_conflict() {
    let harness = TestHarness::new();
    let controller = &harness.controller;
    let job_id = controller.download(CLIP_5).unwrap().job_id;

    assert_eq!(controller.stylize_frames(&job_id).unwrap_err().kind, ErrorKind::Conflict);
    assert_eq!(controller.reassemble(&job_id).unwrap_err().kind, ErrorKind::Conflict);
    assert_eq!(controller.status(&job_id).unwrap().stage, Stage::Downloaded);

    controller.extract_frames(&job_id).unwrap();
    let failure = controller.extract_frames(&job_id).unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Conflict);
    assert_eq!(failure.job_id.as_deref(), Some(job_id.as_str()));
    assert_eq!(controller.status(&job_id).unwrap().stage, Stage::FramesExtracted);
    assert_eq!(harness.extractor.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unknown_job_is_not_found() {
    let harness = TestHarness::new();
    let controller = &harness.controller;

    assert_eq!(controller.extract_frames("unknown-id").unwrap_err().kind, ErrorKind::NotFound);
    assert_eq!(controller.stylize_frames("unknown-id").unwrap_err().kind, ErrorKind::NotFound);
    assert_eq!(controller.reassemble("unknown-id").unwrap_err().kind, ErrorKind::NotFound);
    assert_eq!(controller.status("unknown-id").unwrap_err().kind, ErrorKind::NotFound);
    assert_eq!(controller.retry("unknown-id").unwrap_err().kind, ErrorKind::NotFound);
}

#[test]
fn test_invalid_url_records_no_job() {
    let harness = TestHarness::new();

    for url in ["", "not a url", "ftp://videos.test/clip.mp4", "file:///etc/passwd"] {
        let failure = harness.controller.download(url).unwrap_err();
        assert_eq!(failure.kind, ErrorKind::InvalidUrl, "url: {:?}", url);
    }

    assert!(harness.controller.list_jobs().is_empty());
    assert_eq!(harness.downloader.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_concurrent_extract_single_winner() {
    let harness = TestHarness::with_options(HarnessOptions {
        extract_delay: Some(Duration::from_millis(200)),
        ..HarnessOptions::default()
    });
    let controller = &harness.controller;
    let job_id = controller.download(CLIP_5).unwrap().job_id;

    let id = job_id.as_str();
    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| scope.spawn(move || controller.extract_frames(id)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(f) if f.kind == ErrorKind::Conflict))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(harness.extractor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.status(&job_id).unwrap().stage, Stage::FramesExtracted);
}

#[test]
fn test_concurrent_jobs_are_isolated() {
    let harness = TestHarness::new();
    let controller = &harness.controller;

    let (small, large) = thread::scope(|scope| {
        let small = scope.spawn(|| controller.process("https://videos.test/clip-3.mp4"));
        let large = scope.spawn(|| controller.process("https://videos.test/clip-40.mp4"));
        (small.join().unwrap().unwrap(), large.join().unwrap().unwrap())
    });

    assert_ne!(small.job_id, large.job_id);
    assert_eq!(harness.output_lines(&small.job_id), TestHarness::expected_lines(3, &[]));
    assert_eq!(harness.output_lines(&large.job_id), TestHarness::expected_lines(40, &[]));

    let store = harness.store();
    assert_eq!(store.list_frames(&small.job_id, ArtifactKind::Frames).unwrap().len(), 3);
    assert_eq!(store.list_frames(&large.job_id, ArtifactKind::StyledFrames).unwrap().len(), 40);
}

#[test]
fn test_retry_after_stylize_failure_matches_first_success() {
    let flaky = TestHarness::with_options(HarnessOptions {
        stylizer: Some(FlakyStylizer::transient(1)),
        ..HarnessOptions::default()
    });
    let controller = &flaky.controller;

    let job_id = controller.download(CLIP_5).unwrap().job_id;
    controller.extract_frames(&job_id).unwrap();

    let failure = controller.stylize_frames(&job_id).unwrap_err();
    assert_eq!(failure.kind, ErrorKind::StylizeError);
    let status = controller.status(&job_id).unwrap();
    assert_eq!(status.stage, Stage::Failed);
    assert_eq!(status.error.unwrap().kind, ErrorKind::StylizeError);
    assert!(!flaky.store().exists(&job_id, ArtifactKind::StyledFrames));

    let retried = controller.retry(&job_id).unwrap();
    assert_eq!(retried.stage, Stage::FramesExtracted);
    assert!(retried.error.is_none());

    controller.stylize_frames(&job_id).unwrap();
    controller.reassemble(&job_id).unwrap();

    let clean = TestHarness::new();
    let clean_id = clean.controller.process(CLIP_5).unwrap().job_id;

    assert_eq!(
        flaky.store().get(&job_id, ArtifactKind::Output).unwrap(),
        clean.store().get(&clean_id, ArtifactKind::Output).unwrap()
    );
}

#[test]
fn test_max_attempts_absorbs_transient_failures() {
    let harness = TestHarness::with_options(HarnessOptions {
        max_attempts: 3,
        stylizer: Some(FlakyStylizer::transient(2)),
        ..HarnessOptions::default()
    });

    let done = harness.controller.process(CLIP_5).unwrap();
    assert_eq!(harness.output_lines(&done.job_id), TestHarness::expected_lines(5, &[]));
}

#[test]
fn test_fail_fast_exposes_no_partial_output() {
    let harness = TestHarness::with_options(HarnessOptions {
        stylizer: Some(FlakyStylizer::failing(&[3])),
        ..HarnessOptions::default()
    });
    let controller = &harness.controller;

    let job_id = controller.download(CLIP_5).unwrap().job_id;
    controller.extract_frames(&job_id).unwrap();

    let failure = controller.stylize_frames(&job_id).unwrap_err();
    assert_eq!(failure.kind, ErrorKind::StylizeError);
    assert!(failure.message.contains('3'), "message: {}", failure.message);

    assert!(!harness.store().exists(&job_id, ArtifactKind::StyledFrames));
    assert_eq!(controller.reassemble(&job_id).unwrap_err().kind, ErrorKind::Conflict);
    assert!(!harness.store().exists(&job_id, ArtifactKind::Output));
    assert_eq!(
        controller
            .open_output(&format!("{}/output.mp4", job_id))
            .unwrap_err()
            .kind,
        ErrorKind::Conflict
    );
}

#[test]
fn test_best_effort_substitutes_failed_frames() {
    let harness = TestHarness::with_options(HarnessOptions {
        policy: FramePolicy::BestEffort,
        stylizer: Some(FlakyStylizer::failing(&[2, 4])),
        ..HarnessOptions::default()
    });
    let controller = &harness.controller;

    let job_id = controller.download(CLIP_5).unwrap().job_id;
    controller.extract_frames(&job_id).unwrap();

    let stylized = controller.stylize_frames(&job_id).unwrap();
    assert_eq!(stylized.frame_count, 5);
    assert_eq!(stylized.substituted_frames, vec![2, 4]);

    controller.reassemble(&job_id).unwrap();
    assert_eq!(
        harness.output_lines(&job_id),
        TestHarness::expected_lines(5, &[2, 4])
    );

    let manifest = harness.store().get(&job_id, ArtifactKind::Manifest).unwrap();
    let manifest: serde_json::Value = serde_json::from_slice(&manifest).unwrap();
    assert_eq!(manifest["substitutedFrames"], serde_json::json!([2, 4]));
}

#[test]
fn test_empty_source_is_decode_error() {
    let harness = TestHarness::new();
    let controller = &harness.controller;

    let job_id = controller.download("https://videos.test/clip-0.mp4").unwrap().job_id;
    let failure = controller.extract_frames(&job_id).unwrap_err();

    assert_eq!(failure.kind, ErrorKind::DecodeError);
    assert_eq!(controller.status(&job_id).unwrap().stage, Stage::Failed);
    assert!(!harness.store().exists(&job_id, ArtifactKind::Frames));
}

#[test]
fn test_failed_download_retried_and_redownloaded() {
    let harness = TestHarness::with_options(HarnessOptions {
        download_failures: 1,
        ..HarnessOptions::default()
    });
    let controller = &harness.controller;

    let failure = controller.download(CLIP_5).unwrap_err();
    assert_eq!(failure.kind, ErrorKind::FetchError);
    let job_id = failure.job_id.expect("failure names the job");
    assert!(!harness.store().exists(&job_id, ArtifactKind::Source));

    assert_eq!(controller.retry(&job_id).unwrap().stage, Stage::Created);
    assert_eq!(controller.redownload(&job_id).unwrap().job_id, job_id);
    assert_eq!(controller.status(&job_id).unwrap().stage, Stage::Downloaded);
    assert_eq!(controller.extract_frames(&job_id).unwrap().frame_count, 5);
}

#[test]
fn test_retry_rejected_unless_failed() {
    let harness = TestHarness::new();
    let job_id = harness.controller.download(CLIP_5).unwrap().job_id;

    assert_eq!(harness.controller.retry(&job_id).unwrap_err().kind, ErrorKind::Conflict);
}

#[test]
fn test_cancel_idle_job() {
    let harness = TestHarness::new();
    let controller = &harness.controller;
    let job_id = controller.download(CLIP_5).unwrap().job_id;

    let status = controller.cancel(&job_id).unwrap();
    assert_eq!(status.stage, Stage::Failed);
    assert_eq!(status.error.unwrap().kind, ErrorKind::Cancelled);

    assert_eq!(controller.extract_frames(&job_id).unwrap_err().kind, ErrorKind::Conflict);
    assert_eq!(controller.retry(&job_id).unwrap_err().kind, ErrorKind::Conflict);
    assert_eq!(controller.cancel(&job_id).unwrap_err().kind, ErrorKind::Conflict);
}

#[test]
fn test_cancel_in_flight_stops_at_next_stage() {
    let harness = TestHarness::with_options(HarnessOptions {
        extract_delay: Some(Duration::from_millis(200)),
        ..HarnessOptions::default()
    });
    let controller = &harness.controller;
    let job_id = controller.download(CLIP_5).unwrap().job_id;

    thread::scope(|scope| {
        let extract = scope.spawn(|| controller.extract_frames(&job_id));
        wait_until_active(&harness, &job_id);

        let status = controller.cancel(&job_id).unwrap();
        assert_eq!(status.stage, Stage::Downloaded);

        assert_eq!(extract.join().unwrap().unwrap().frame_count, 5);
    });

    assert_eq!(controller.status(&job_id).unwrap().stage, Stage::FramesExtracted);

    let failure = controller.stylize_frames(&job_id).unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    let status = controller.status(&job_id).unwrap();
    assert_eq!(status.stage, Stage::Failed);
    assert_eq!(status.error.unwrap().kind, ErrorKind::Cancelled);
    assert!(!harness.store().exists(&job_id, ArtifactKind::StyledFrames));
}

#[test]
fn test_cancel_during_reassemble_keeps_output() {
    let harness = TestHarness::with_options(HarnessOptions {
        reassemble_delay: Some(Duration::from_millis(200)),
        ..HarnessOptions::default()
    });
    let controller = &harness.controller;
    let job_id = controller.download(CLIP_5).unwrap().job_id;
    controller.extract_frames(&job_id).unwrap();
    controller.stylize_frames(&job_id).unwrap();

    let done = thread::scope(|scope| {
        let reassemble = scope.spawn(|| controller.reassemble(&job_id));
        wait_until_active(&harness, &job_id);

        let status = controller.cancel(&job_id).unwrap();
        assert_eq!(status.stage, Stage::Stylized);

        reassemble.join().unwrap().unwrap()
    });

    let duplicate = controller.reassemble(&job_id).unwrap_err();
    assert_eq!(duplicate.kind, ErrorKind::Conflict);
    assert_eq!(controller.status(&job_id).unwrap().stage, Stage::Reassembled);
    assert!(controller.open_output(&done.download_ref).is_ok());
}

#[test]
fn test_out_of_order_with_pending_cancel_is_conflict() {
    let harness = TestHarness::with_options(HarnessOptions {
        extract_delay: Some(Duration::from_millis(200)),
        ..HarnessOptions::default()
    });
    let controller = &harness.controller;
    let job_id = controller.download(CLIP_5).unwrap().job_id;

    thread::scope(|scope| {
        let extract = scope.spawn(|| controller.extract_frames(&job_id));
        wait_until_active(&harness, &job_id);
        controller.cancel(&job_id).unwrap();
        extract.join().unwrap().unwrap();
    });

    let failure = controller.reassemble(&job_id).unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Conflict);
    assert_eq!(controller.status(&job_id).unwrap().stage, Stage::FramesExtracted);
}

#[test]
fn test_open_output_streams_final_video() {
    let harness = TestHarness::new();
    let done = harness.controller.process(CLIP_5).unwrap();

    let mut file = harness.controller.open_output(&done.download_ref).unwrap();
    let mut content = String::new();
    file.read_to_string(&mut content).unwrap();

    let lines: Vec<String> = content.lines().map(str::to_string).collect();
    assert_eq!(lines, TestHarness::expected_lines(5, &[]));

    let other = format!("{}/source.mp4", done.job_id);
    assert_eq!(
        harness.controller.open_output(&other).unwrap_err().kind,
        ErrorKind::NotFound
    );
    assert_eq!(
        harness.controller.open_output("missing-job/output.mp4").unwrap_err().kind,
        ErrorKind::NotFound
    );
}

#[test]
fn test_recover_restores_jobs_after_restart() {
    let harness = TestHarness::new();
    let finished = harness.controller.process(CLIP_5).unwrap();
    let pending = harness.controller.download(CLIP_5).unwrap().job_id;

    std::fs::create_dir_all(harness.work_dir().join("broken-job")).unwrap();
    std::fs::write(harness.work_dir().join("broken-job/job.json"), b"{not json").unwrap();

    // Leftovers of an extraction interrupted by the restart.
    let pending_dir = harness.work_dir().join(&pending);
    let leftover_file = pending_dir.join(".staged-abc.mp4");
    let leftover_dir = pending_dir.join(".staged-frames-abc");
    std::fs::write(&leftover_file, b"partial").unwrap();
    std::fs::create_dir_all(&leftover_dir).unwrap();
    std::fs::write(leftover_dir.join("frame-000001.png"), b"partial").unwrap();

    let restarted = harness.restart();
    assert_eq!(
        restarted.status(&finished.job_id).unwrap_err().kind,
        ErrorKind::NotFound
    );

    assert_eq!(restarted.recover().unwrap(), 2);
    assert_eq!(restarted.recover().unwrap(), 0);

    assert_eq!(restarted.status(&finished.job_id).unwrap().stage, Stage::Reassembled);
    assert!(restarted.open_output(&finished.download_ref).is_ok());

    assert!(!leftover_file.exists());
    assert!(!leftover_dir.exists());
    assert!(harness.store().exists(&pending, ArtifactKind::Source));

    assert_eq!(restarted.status(&pending).unwrap().stage, Stage::Downloaded);
    assert_eq!(restarted.extract_frames(&pending).unwrap().frame_count, 5);
}

#[test]
fn test_sweep_removes_only_expired_jobs() {
    let harness = TestHarness::new();
    let controller = &harness.controller;
    let done = controller.process(CLIP_5).unwrap();

    assert!(controller.sweep_expired().unwrap().is_empty());
    assert!(harness.work_dir().join(&done.job_id).exists());

    let later = Utc::now() + chrono::Duration::hours(25);
    assert_eq!(controller.sweep_expired_at(later).unwrap(), vec![done.job_id.clone()]);

    assert!(!harness.work_dir().join(&done.job_id).exists());
    assert_eq!(controller.status(&done.job_id).unwrap_err().kind, ErrorKind::NotFound);
}

#[test]
fn test_sweep_skips_job_with_stage_in_flight() {
    let harness = TestHarness::with_options(HarnessOptions {
        extract_delay: Some(Duration::from_millis(200)),
        ..HarnessOptions::default()
    });
    let controller = &harness.controller;
    let job_id = controller.download(CLIP_5).unwrap().job_id;
    let later = Utc::now() + chrono::Duration::hours(25);

    thread::scope(|scope| {
        let extract = scope.spawn(|| controller.extract_frames(&job_id));
        wait_until_active(&harness, &job_id);

        assert!(controller.sweep_expired_at(later).unwrap().is_empty());
        extract.join().unwrap().unwrap();
    });

    assert_eq!(controller.status(&job_id).unwrap().stage, Stage::FramesExtracted);
}

#[test]
fn test_events_follow_job_progress() {
    let harness = TestHarness::new();
    let mut events = harness.controller.subscribe();

    let done = harness.controller.process(CLIP_5).unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert!(received.iter().all(|e| e.job_id == done.job_id));
    assert!(received.iter().all(|e| e.status != JobStatus::Failed));

    let last = received.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.stage, Stage::Reassembled);

    let frame_progress: Vec<_> = received.iter().filter_map(|e| e.progress).collect();
    assert!(!frame_progress.is_empty());
    assert!(frame_progress.iter().any(|p| p.done == 5 && p.total == 5));
}

#[test]
fn test_worker_pool_runs_jobs_in_parallel() {
    let harness = TestHarness::new();
    let pool = WorkerPool::new(Arc::clone(&harness.controller), 2).unwrap();

    pool.submit(StageRequest::Process {
        source_url: "https://videos.test/clip-4.mp4".to_string(),
    })
    .unwrap();
    pool.submit(StageRequest::Process {
        source_url: "https://videos.test/clip-6.mp4".to_string(),
    })
    .unwrap();

    let mut counts = Vec::new();
    for _ in 0..2 {
        let outcome = pool.recv_result().unwrap();
        match outcome.result.unwrap() {
            StageResponse::Reassembled(done) => {
                counts.push(harness.output_lines(&done.job_id).len() - 1);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }
    counts.sort_unstable();
    assert_eq!(counts, vec![4, 6]);

    pool.shutdown();
    pool.wait();
}
