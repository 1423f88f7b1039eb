mod support;

use futures::StreamExt;
use pi_recorder::{
    DeviceRef, LevelBus, LifecycleState, MemoryStatusStore, RecordingSession, SessionError, SessionOutcome,
    StartRequest, StatusStore,
};
use std::sync::Arc;
use std::time::Duration;
use support::{FakePipeline, HistoryStore};
use tokio_util::sync::CancellationToken;

fn request(device: DeviceRef) -> StartRequest {
    StartRequest {
        device,
        duration: None,
    }
}

fn is_timestamped_name(name: &str) -> bool {
    // recording_YYYYMMDD_HHMMSS.ogg
    let Some(stamp) = name
        .strip_prefix("recording_")
        .and_then(|rest| rest.strip_suffix(".ogg"))
    else {
        return false;
    };
    stamp.len() == 15
        && stamp.chars().enumerate().all(|(i, c)| {
            if i == 8 {
                c == '_'
            } else {
                c.is_ascii_digit()
            }
        })
}

#[tokio::test]
async fn test_stop_moves_recording_to_durable_storage() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = support::storage(&dir);
    storage.prepare().await?;

    let status = Arc::new(HistoryStore::default());
    let (backends, _levels) = support::backends(FakePipeline::writing(512));
    let session = RecordingSession::new(
        support::session_config(),
        status.clone(),
        backends,
        storage.clone(),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(session.run(request(support::headset()), cancel.clone()));

    let recording = support::wait_for_status(status.as_ref(), Duration::from_secs(2), |s| {
        s.lifecycle_state == LifecycleState::Recording
    })
    .await?;
    assert!(recording.recording);
    assert_eq!(recording.device, Some(support::headset()));
    let filename = recording.filename.clone().unwrap();
    assert!(is_timestamped_name(&filename), "unexpected name {}", filename);

    cancel.cancel();
    let outcome = handle.await?;

    match outcome {
        SessionOutcome::Completed {
            filename: saved,
            path,
            bytes,
            ..
        } => {
            assert_eq!(saved, filename);
            assert_eq!(path, storage.durable_path(&filename));
            assert_eq!(bytes, 512);
        }
        other => panic!("expected completion, got {:?}", other),
    }

    assert_eq!(support::files_in(storage.recordings_dir()), vec![filename]);
    assert!(support::files_in(&dir.path().join("scratch")).is_empty());

    assert_eq!(
        status.states(),
        vec![
            LifecycleState::Recording,
            LifecycleState::Converting,
            LifecycleState::Completed,
            LifecycleState::Idle,
        ]
    );

    let last = status.read().await?;
    assert!(!last.recording);
    assert_eq!(last.filename, None);
    assert_eq!(last.error_message, None);
    Ok(())
}

#[tokio::test]
async fn test_empty_capture_fails_without_durable_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = support::storage(&dir);
    storage.prepare().await?;

    let status = Arc::new(MemoryStatusStore::new());
    let (backends, _levels) = support::backends(FakePipeline::writing(0));
    let session = RecordingSession::new(support::session_config(), status.clone(), backends, storage.clone());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(session.run(request(support::headset()), cancel.clone()));
    support::wait_for_status(status.as_ref(), Duration::from_secs(2), |s| s.recording).await?;

    cancel.cancel();
    let outcome = handle.await?;
    assert!(matches!(outcome, SessionOutcome::Failed(SessionError::NoData)));

    let last = status.read().await?;
    assert_eq!(last.lifecycle_state, LifecycleState::Error);
    assert!(!last.recording);
    assert_eq!(last.error_message.as_deref(), Some("no data captured"));

    assert!(support::files_in(storage.recordings_dir()).is_empty());
    assert!(support::files_in(&dir.path().join("scratch")).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unresolvable_device_never_starts_capture() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = support::storage(&dir);
    storage.prepare().await?;

    let status = Arc::new(HistoryStore::default());
    let pipeline = FakePipeline::writing(512);
    let (backends, _levels) = support::backends(pipeline.clone());
    let session = RecordingSession::new(support::session_config(), status.clone(), backends, storage.clone());

    let device = DeviceRef::new(support::UNKNOWN_MAC, "", "hci0");
    let outcome = session.run(request(device), CancellationToken::new()).await;

    match outcome {
        SessionOutcome::Failed(SessionError::Resolution(msg)) => {
            assert!(msg.contains(support::UNKNOWN_MAC));
        }
        other => panic!("expected resolution failure, got {:?}", other),
    }

    assert_eq!(pipeline.spawn_count(), 0);
    assert_eq!(status.states(), vec![LifecycleState::Error]);

    let last = status.read().await?;
    assert!(!last.recording);
    assert!(last.error_message.unwrap().starts_with("device not resolvable"));
    assert!(support::files_in(storage.recordings_dir()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_duration_limit_stops_recording() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = support::storage(&dir);
    storage.prepare().await?;

    let status = Arc::new(MemoryStatusStore::new());
    let (backends, _levels) = support::backends(FakePipeline::writing(64));
    let session = RecordingSession::new(support::session_config(), status.clone(), backends, storage.clone());

    let start = StartRequest {
        device: support::headset(),
        duration: Some(Duration::from_millis(150)),
    };
    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        session.run(start, CancellationToken::new()),
    )
    .await?;

    assert!(outcome.is_completed());
    assert_eq!(support::files_in(storage.recordings_dir()).len(), 1);
    assert_eq!(status.read().await?.lifecycle_state, LifecycleState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_pipeline_crash_keeps_partial_recording() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = support::storage(&dir);
    storage.prepare().await?;

    let status = Arc::new(MemoryStatusStore::new());
    let pipeline = FakePipeline {
        bytes: 256,
        exit_after: Some(Duration::from_millis(100)),
        ..FakePipeline::default()
    };
    let (backends, _levels) = support::backends(pipeline);
    let session = RecordingSession::new(support::session_config(), status.clone(), backends, storage.clone());

    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        session.run(request(support::headset()), CancellationToken::new()),
    )
    .await?;

    match outcome {
        SessionOutcome::Failed(SessionError::PipelineExited { code, saved }) => {
            assert_eq!(code, Some(1));
            let saved = saved.unwrap();
            assert!(saved.starts_with(storage.recordings_dir()));
            assert_eq!(std::fs::metadata(&saved)?.len(), 256);
        }
        other => panic!("expected pipeline exit, got {:?}", other),
    }

    let last = status.read().await?;
    assert_eq!(last.lifecycle_state, LifecycleState::Error);
    assert!(!last.recording);
    assert!(last.error_message.is_some());
    Ok(())
}

#[tokio::test]
async fn test_stubborn_pipeline_is_killed_after_grace_period() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = support::storage(&dir);
    storage.prepare().await?;

    let status = Arc::new(MemoryStatusStore::new());
    let pipeline = FakePipeline {
        bytes: 128,
        ignore_stop: true,
        ..FakePipeline::default()
    };
    let (backends, _levels) = support::backends(pipeline);
    let session = RecordingSession::new(support::session_config(), status.clone(), backends, storage.clone());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(session.run(request(support::headset()), cancel.clone()));
    support::wait_for_status(status.as_ref(), Duration::from_secs(2), |s| s.recording).await?;

    cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(3), handle).await??;

    assert!(outcome.is_completed());
    assert_eq!(support::files_in(storage.recordings_dir()).len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_levels_published_while_recording() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = support::storage(&dir);
    storage.prepare().await?;

    let status = Arc::new(MemoryStatusStore::new());
    let (backends, levels) = support::backends(FakePipeline::writing(64));
    let mut samples = levels.subscribe_levels().await?;
    let session = RecordingSession::new(support::session_config(), status.clone(), backends, storage);

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(session.run(request(support::headset()), cancel.clone()));

    let sample = tokio::time::timeout(Duration::from_secs(2), samples.next())
        .await?
        .unwrap();
    assert!((sample.level - 0.5).abs() < 0.01);
    assert!(sample.db < -5.0 && sample.db > -7.0);

    cancel.cancel();
    assert!(handle.await?.is_completed());
    Ok(())
}

#[tokio::test]
async fn test_heartbeat_continues_while_converting() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = support::storage(&dir);
    storage.prepare().await?;

    let status = Arc::new(MemoryStatusStore::new());
    let pipeline = FakePipeline {
        bytes: 128,
        ignore_stop: true,
        ..FakePipeline::default()
    };
    let (backends, _levels) = support::backends(pipeline);
    let config = pi_recorder::SessionConfig {
        grace_period: Duration::from_millis(1200),
        ..support::session_config()
    };
    let session = RecordingSession::new(config, status.clone(), backends, storage);

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(session.run(request(support::headset()), cancel.clone()));
    support::wait_for_status(status.as_ref(), Duration::from_secs(2), |s| s.recording).await?;

    cancel.cancel();

    // Track how long updated_at stays frozen while the encoder is given its grace period
    let mut converting_seen = false;
    let mut last_change = tokio::time::Instant::now();
    let mut last_stamp = status.read().await?.updated_at;
    let mut max_gap = Duration::ZERO;
    while !handle.is_finished() {
        let current = status.read().await?;
        if current.lifecycle_state == LifecycleState::Converting {
            converting_seen = true;
        }
        if current.updated_at != last_stamp {
            max_gap = max_gap.max(last_change.elapsed());
            last_stamp = current.updated_at;
            last_change = tokio::time::Instant::now();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(handle.await?.is_completed());
    assert!(converting_seen);
    assert!(max_gap < Duration::from_millis(500), "heartbeat stalled for {:?}", max_gap);
    Ok(())
}

#[tokio::test]
async fn test_failed_move_keeps_scratch_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = support::storage(&dir);

    // A regular file where the recordings directory should be
    std::fs::create_dir_all(dir.path().join("scratch"))?;
    std::fs::write(dir.path().join("recordings"), b"not a directory")?;

    let status = Arc::new(MemoryStatusStore::new());
    let (backends, _levels) = support::backends(FakePipeline::writing(256));
    let session = RecordingSession::new(support::session_config(), status.clone(), backends, storage.clone());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(session.run(request(support::headset()), cancel.clone()));
    let filename = support::wait_for_status(status.as_ref(), Duration::from_secs(2), |s| s.recording)
        .await?
        .filename
        .unwrap();

    cancel.cancel();
    let outcome = handle.await?;
    assert!(matches!(outcome, SessionOutcome::Failed(SessionError::Finalize(_))));

    let last = status.read().await?;
    assert_eq!(last.lifecycle_state, LifecycleState::Error);
    assert!(!last.recording);
    assert!(last
        .error_message
        .unwrap()
        .starts_with("failed to save recording"));

    let scratch = storage.scratch_path(&filename);
    assert_eq!(std::fs::metadata(&scratch)?.len(), 256);
    Ok(())
}
