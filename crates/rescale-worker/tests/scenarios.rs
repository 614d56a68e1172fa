//! End-to-end worker scenarios over in-memory state and fake media tools.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{FakeEncoder, FixedProber, Harness};
use rescale_models::{ConversionState, Job, JobId, JobStatus, SubmitJob};
use rescale_queue::{JobStore, WorkQueue};
use rescale_storage::ObjectStore;
use rescale_worker::{reconcile, run_job, Scheduler};

const LOCAL_INPUT: &str = "/data/source.mp4";

#[tokio::test]
async fn test_all_resolutions_complete() {
    let h = Harness::new(FixedProber::new(1920, 1080, 60.0), FakeEncoder::new());
    h.submit("j1", LOCAL_INPUT, &["720p", "1080p"]).await;
    let id = h.admit_next().await;

    run_job(h.ctx.clone(), id).await;

    let job = h.job("j1").await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert_eq!(job.progress, 100.0);
    assert!(job.error.is_none());
    for label in ["720p", "1080p"] {
        let conversion = &job.conversions[label];
        assert_eq!(conversion.status, ConversionState::Completed);
        assert_eq!(conversion.progress, 100.0);
        let url = conversion.output_url.as_deref().unwrap();
        assert!(url.ends_with(&format!("processed/j1/{}.mp4", label)));
        assert!(h
            .storage
            .exists(&format!("processed/j1/{}.mp4", label))
            .await
            .unwrap());
    }

    assert_eq!(h.queue.active_count().await.unwrap(), 0);
    assert!(h.scratch_files().is_empty());
    assert_eq!(h.prober.locators.lock().unwrap()[0], LOCAL_INPUT);
}

#[tokio::test]
async fn test_upscale_is_skipped_and_counts_as_success() {
    let h = Harness::new(FixedProber::new(1280, 720, 60.0), FakeEncoder::new());
    h.submit("j2", LOCAL_INPUT, &["4K"]).await;
    let id = h.admit_next().await;

    run_job(h.ctx.clone(), id).await;

    let job = h.job("j2").await;
    assert_eq!(job.status, JobStatus::Completed);
    let conversion = &job.conversions["4K"];
    assert_eq!(conversion.status, ConversionState::Skipped);
    assert_eq!(conversion.progress, 100.0);
    assert!(conversion.output_url.is_none());
    assert!(conversion.error.is_none());
    assert!(conversion.message.as_deref().unwrap().contains("3840x2160"));
    assert!(h.encoder.calls().is_empty());
}

#[tokio::test]
async fn test_skipped_fails_job_when_policy_is_strict() {
    let h = Harness::with_config(
        FixedProber::new(1280, 720, 60.0),
        FakeEncoder::new(),
        |config| config.skipped_counts_as_success = false,
    );
    h.submit("strict", LOCAL_INPUT, &["720p", "1080p"]).await;
    let id = h.admit_next().await;

    run_job(h.ctx.clone(), id).await;

    let job = h.job("strict").await;
    assert_eq!(job.conversions["720p"].status, ConversionState::Completed);
    assert_eq!(job.conversions["1080p"].status, ConversionState::Skipped);
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_none());
}

#[tokio::test]
async fn test_upscale_allowed_when_skip_disabled() {
    let h = Harness::with_config(
        FixedProber::new(1280, 720, 60.0),
        FakeEncoder::new(),
        |config| config.skip_upscale = false,
    );
    h.submit("up", LOCAL_INPUT, &["1080p"]).await;
    let id = h.admit_next().await;

    run_job(h.ctx.clone(), id).await;

    let job = h.job("up").await;
    assert_eq!(job.conversions["1080p"].status, ConversionState::Completed);
    assert_eq!(h.encoder.calls(), vec!["1080p".to_string()]);
}

#[tokio::test]
async fn test_one_failed_resolution_fails_job() {
    let h = Harness::new(
        FixedProber::new(1920, 1080, 60.0),
        FakeEncoder::new().failing("720p"),
    );
    h.submit("j3", LOCAL_INPUT, &["1080p", "720p", "480p"]).await;
    let id = h.admit_next().await;

    run_job(h.ctx.clone(), id).await;

    let job = h.job("j3").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_none());

    let failed = &job.conversions["720p"];
    assert_eq!(failed.status, ConversionState::Failed);
    assert_eq!(failed.progress, 0.0);
    assert!(failed.output_url.is_none());
    assert!(failed.error.as_deref().unwrap().contains("Conversion failed!"));

    for label in ["1080p", "480p"] {
        assert_eq!(job.conversions[label].status, ConversionState::Completed);
        assert!(job.conversions[label].output_url.is_some());
    }
    assert!(!h.storage.exists("processed/j3/720p.mp4").await.unwrap());
    assert!(h.scratch_files().is_empty());
}

#[tokio::test]
async fn test_encode_timeout_fails_only_that_resolution() {
    let h = Harness::with_config(
        FixedProber::new(1920, 1080, 60.0),
        FakeEncoder::new().stalling("720p"),
        |config| {
            config.encode_timeout = Some(Duration::from_secs(1));
            config.max_resolution_parallel = 2;
        },
    );
    h.submit("slow", LOCAL_INPUT, &["720p", "480p"]).await;
    let id = h.admit_next().await;

    tokio::time::timeout(Duration::from_secs(10), run_job(h.ctx.clone(), id))
        .await
        .expect("encode deadline should end the job");

    let job = h.job("slow").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_none());

    let timed_out = &job.conversions["720p"];
    assert_eq!(timed_out.status, ConversionState::Failed);
    assert!(timed_out.error.as_deref().unwrap().contains("timed out after 1 seconds"));
    assert!(timed_out.output_url.is_none());

    let sibling = &job.conversions["480p"];
    assert_eq!(sibling.status, ConversionState::Completed);
    assert!(sibling.output_url.is_some());

    assert_eq!(h.queue.active_count().await.unwrap(), 0);
    assert!(h.scratch_files().is_empty());
}

#[tokio::test]
async fn test_encoder_panic_fails_only_that_resolution() {
    let h = Harness::new(
        FixedProber::new(1920, 1080, 60.0),
        FakeEncoder::new().panicking("480p"),
    );
    h.submit("boom", LOCAL_INPUT, &["720p", "480p"]).await;
    let id = h.admit_next().await;

    run_job(h.ctx.clone(), id).await;

    let job = h.job("boom").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.conversions["720p"].status, ConversionState::Completed);
    assert_eq!(job.conversions["480p"].status, ConversionState::Failed);
    assert!(job.conversions["480p"].error.as_deref().unwrap().contains("panicked"));
    assert_eq!(h.queue.active_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_below_100_while_processing() {
    let h = Harness::new(
        FixedProber::new(1920, 1080, 10.0),
        FakeEncoder::new().with_steps(&[1.0, 2.5, 5.0, 3.0, 8.0, 12.0]),
    );
    h.submit("prog", LOCAL_INPUT, &["720p", "480p"]).await;
    let id = h.admit_next().await;

    run_job(h.ctx.clone(), id).await;

    let history: Vec<Job> = h
        .store
        .history()
        .into_iter()
        .filter(|job| job.job_id.as_str() == "prog")
        .collect();
    assert!(history.len() > 4);

    for label in ["720p", "480p"] {
        let mut last = 0.0;
        let mut seen_processing = false;
        for snapshot in &history {
            let conversion = &snapshot.conversions[label];
            assert!(conversion.progress >= last, "{} went backwards", label);
            last = conversion.progress;
            if conversion.status == ConversionState::Processing {
                seen_processing = true;
                assert!(conversion.progress <= 98.0);
            }
        }
        assert!(seen_processing);
        assert_eq!(last, 100.0);
    }

    let job_progress: Vec<f64> = history.iter().map(|j| j.progress).collect();
    assert!(job_progress.windows(2).all(|w| w[1] >= w[0]));
    assert!(history
        .iter()
        .any(|j| j.conversions["720p"].progress == 98.0
            && j.conversions["720p"].status == ConversionState::Processing));
}

#[tokio::test]
async fn test_remote_input_is_downloaded_and_cleaned_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/in.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"source-bytes".to_vec()))
        .mount(&server)
        .await;

    let h = Harness::new(FixedProber::new(1920, 1080, 60.0), FakeEncoder::new());

    let staged = h.work_dir.path().join("staged.mp4");
    std::fs::write(&staged, b"staged").unwrap();
    h.storage.upload(&staged, "uploads/dl.mp4").await.unwrap();
    std::fs::remove_file(&staged).unwrap();

    h.submit_request(
        SubmitJob {
            source_path: Some("uploads/dl.mp4".to_string()),
            ..SubmitJob::new(format!("{}/in.mp4", server.uri()), vec!["720p".to_string()])
        }
        .with_job_id("dl"),
    )
    .await;
    let id = h.admit_next().await;

    run_job(h.ctx.clone(), id).await;

    let job = h.job("dl").await;
    assert_eq!(job.status, JobStatus::Completed);

    let probed = h.prober.locators.lock().unwrap()[0].clone();
    assert!(probed.ends_with("dl_input.mp4"));
    assert!(h.scratch_files().is_empty());
    assert!(!h.storage.exists("uploads/dl.mp4").await.unwrap());
}

#[tokio::test]
async fn test_download_failure_fails_job_without_encoding() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = Harness::new(FixedProber::new(1920, 1080, 60.0), FakeEncoder::new());
    h.submit("nodl", &format!("{}/missing.mp4", server.uri()), &["720p", "480p"])
        .await;
    let id = h.admit_next().await;

    run_job(h.ctx.clone(), id).await;

    let job = h.job("nodl").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.completed_at.is_some());
    assert!(job.error.as_deref().unwrap().contains("404"));
    assert!(job.conversions.values().all(|c| !c.is_terminal()));
    assert!(h.prober.locators.lock().unwrap().is_empty());
    assert!(h.encoder.calls().is_empty());
    assert_eq!(h.queue.active_count().await.unwrap(), 0);
    assert!(h.scratch_files().is_empty());
}

#[tokio::test]
async fn test_stalled_download_fails_job_after_read_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late".to_vec())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let h = Harness::with_config(
        FixedProber::new(1920, 1080, 60.0),
        FakeEncoder::new(),
        |config| config.download_read_timeout = Duration::from_millis(200),
    );
    h.submit("stall", &format!("{}/in.mp4", server.uri()), &["720p"]).await;
    let id = h.admit_next().await;

    tokio::time::timeout(Duration::from_secs(2), run_job(h.ctx.clone(), id))
        .await
        .expect("download should give up well before the server answers");

    let job = h.job("stall").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());
    assert!(h.encoder.calls().is_empty());
    assert_eq!(h.queue.active_count().await.unwrap(), 0);
    assert!(h.scratch_files().is_empty());
}

#[tokio::test]
async fn test_climbing_job_id_never_touches_files_outside_work_dir() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"attacker".to_vec()))
        .mount(&server)
        .await;

    let h = Harness::new(FixedProber::new(1920, 1080, 60.0), FakeEncoder::new());
    let victim = h.storage_dir.path().join("victim_input.mp4");
    std::fs::write(&victim, b"precious").unwrap();

    // Records written before submission checks existed skip validation.
    let sibling = h.storage_dir.path().file_name().unwrap().to_string_lossy();
    let id = JobId::from(format!("../{}/victim", sibling).as_str());
    let job = Job::new(id.clone(), format!("{}/in.mp4", server.uri()), vec!["720p".to_string()]);
    h.repo.insert(&job).await.unwrap();
    h.queue.enqueue(&id).await.unwrap();
    let admitted = h.admit_next().await;

    run_job(h.ctx.clone(), admitted).await;

    let job = h.repo.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("Unsafe scratch file name"));
    assert_eq!(std::fs::read(&victim).unwrap(), b"precious");
    assert!(h.encoder.calls().is_empty());
    assert_eq!(h.queue.active_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_record_releases_active_slot() {
    let h = Harness::new(FixedProber::new(1920, 1080, 60.0), FakeEncoder::new());
    let ghost = JobId::from("ghost");
    assert!(h.queue.try_activate(&ghost).await.unwrap());

    run_job(h.ctx.clone(), ghost.clone()).await;

    assert_eq!(h.queue.active_count().await.unwrap(), 0);
    assert!(h.store.get(&ghost).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reconcile_purges_missing_and_finished_jobs() {
    let h = Harness::with_config(
        FixedProber::new(1920, 1080, 60.0),
        FakeEncoder::new(),
        |config| config.max_concurrent_jobs = 3,
    );
    h.submit("done", LOCAL_INPUT, &["720p"]).await;
    h.submit("live", LOCAL_INPUT, &["720p"]).await;
    let done = h.admit_next().await;
    let live = h.admit_next().await;
    h.repo
        .update(&done, |job| {
            job.fail("stopped")?;
            Ok(())
        })
        .await
        .unwrap();

    assert!(h.queue.try_activate(&JobId::from("vanished")).await.unwrap());

    assert_eq!(reconcile(&h.ctx).await.unwrap(), 2);
    assert_eq!(h.queue.active_members().await.unwrap(), vec![live]);
}

#[tokio::test]
async fn test_capacity_keeps_later_jobs_waiting() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::with_config(
        FixedProber::new(1920, 1080, 60.0),
        FakeEncoder::new().gated(gate.clone()),
        |config| config.max_concurrent_jobs = 1,
    );
    h.submit("first", LOCAL_INPUT, &["720p"]).await;
    h.submit("second", LOCAL_INPUT, &["720p"]).await;

    let scheduler = Arc::new(Scheduler::new(h.ctx.clone()));
    let running = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    h.wait_for_encodes(1).await;

    // Give the loop time to try admitting the second job
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.job("first").await.status, JobStatus::Processing);
    assert_eq!(h.job("second").await.status, JobStatus::Waiting);
    assert_eq!(h.queue.active_count().await.unwrap(), 1);
    assert_eq!(
        h.queue.queued_ids().await.unwrap(),
        vec![JobId::from("second")]
    );

    gate.add_permits(2);
    h.wait_for_status("second", JobStatus::Completed).await;
    assert_eq!(h.job("first").await.status, JobStatus::Completed);

    scheduler.shutdown();
    running.await.unwrap().unwrap();
    assert_eq!(h.queue.active_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_startup_recovers_interrupted_jobs() {
    let h = Harness::new(FixedProber::new(1920, 1080, 60.0), FakeEncoder::new());
    h.submit("interrupted", LOCAL_INPUT, &["720p", "480p"]).await;
    let id = h.admit_next().await;
    // Crash left one resolution finished and the job processing
    h.repo
        .update(&id, |job| {
            job.transition(JobStatus::Processing)?;
            job.record_outcome(rescale_models::ConversionStatus::completed("480p", "earlier-url"));
            Ok(())
        })
        .await
        .unwrap();
    assert!(h.queue.try_activate(&JobId::from("vanished")).await.unwrap());

    let scheduler = Arc::new(Scheduler::new(h.ctx.clone()));
    let running = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    h.wait_for_status("interrupted", JobStatus::Completed).await;

    let job = h.job("interrupted").await;
    assert_eq!(job.conversions["480p"].output_url.as_deref(), Some("earlier-url"));
    assert_eq!(h.encoder.calls(), vec!["720p".to_string()]);

    scheduler.shutdown();
    running.await.unwrap().unwrap();
    assert_eq!(h.queue.active_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_encoders_after_timeout() {
    let h = Harness::with_config(
        FixedProber::new(1920, 1080, 60.0),
        FakeEncoder::new().hanging(),
        |config| config.shutdown_timeout = Duration::from_millis(100),
    );
    h.submit("stuck", LOCAL_INPUT, &["720p"]).await;

    let scheduler = Arc::new(Scheduler::new(h.ctx.clone()));
    let running = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    h.wait_for_encodes(1).await;
    scheduler.shutdown();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("scheduler stopped")
        .unwrap()
        .unwrap();

    assert!(h.ctx.is_cancelled());
    let job = h.job("stuck").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.conversions["720p"]
        .error
        .as_deref()
        .unwrap()
        .contains("cancelled"));
    assert_eq!(h.queue.active_count().await.unwrap(), 0);
}
