//! Integration tests for the inference bridge.
//!
//! Tests cover:
//! - Single-flight execution under concurrent callers
//! - Lazy initialization and runtime lookup
//! - Error mapping for missing images and backend failures
//! - Faulted and closed bridges

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invokes_never_overlap() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let backend = StubBackend::answering(NO_OBJECT_OUTPUT).with_delay(Duration::from_millis(25));
    let (bridge, _home) = create_test_bridge(backend);

    let mut handles = Vec::new();
    for i in 0..6 {
        let image = create_named_image(dir.path(), &format!("img{}.png", i));
        let bridge = bridge.clone();
        handles.push(tokio::spawn(async move { bridge.invoke(&image).await }));
    }
    for handle in handles {
        assert_eq!(handle.await??, NO_OBJECT_OUTPUT);
    }

    let backend = bridge.backend();
    assert_eq!(backend.calls.load(Ordering::SeqCst), 6);
    assert_eq!(backend.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(backend.starts.load(Ordering::SeqCst), 1, "runtime is started once");

    let mut intervals = backend.intervals.lock().unwrap().clone();
    intervals.sort_by_key(|(start, _)| *start);
    for pair in intervals.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "calls overlapped");
    }
    assert_eq!(bridge.state(), BridgeState::Ready);

    Ok(())
}

#[tokio::test]
async fn test_invoke_initializes_lazily() -> anyhow::Result<()> {
    let image = create_test_image();
    let (bridge, home) = create_test_bridge(StubBackend::answering(NO_OBJECT_OUTPUT));
    assert_eq!(bridge.state(), BridgeState::Uninitialized);

    bridge.invoke(image.path()).await?;
    assert_eq!(bridge.state(), BridgeState::Ready);

    let env = bridge.backend().environment.lock().unwrap().clone().unwrap();
    assert_eq!(env.home, home.path());
    assert_eq!(env.interpreter, home.path().join("bin/python3"));
    assert_eq!(env.search_path, vec![home.path().join("model")]);

    // A second initialize is a no-op
    bridge.initialize().await?;
    assert_eq!(bridge.backend().starts.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_missing_image_is_not_found() -> anyhow::Result<()> {
    let (bridge, _home) = create_test_bridge(StubBackend::answering(NO_OBJECT_OUTPUT));

    let err = bridge.invoke("/nonexistent/image.png").await.unwrap_err();
    assert!(matches!(err, DetectionError::NotFound(_)));
    assert_eq!(bridge.backend().calls.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_backend_error_becomes_execution_error() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let broken = create_named_image(dir.path(), "broken.png");
    let fine = create_named_image(dir.path(), "fine.png");
    let backend = StubBackend::answering(NO_OBJECT_OUTPUT).with_failure("broken.png", "tensor shape mismatch");
    let (bridge, _home) = create_test_bridge(backend);

    match bridge.invoke(&broken).await {
        Err(DetectionError::Execution(msg)) => assert!(msg.contains("tensor shape mismatch")),
        other => panic!("expected execution error, got {:?}", other),
    }

    // The gate is released and the bridge stays usable
    assert_eq!(bridge.state(), BridgeState::Ready);
    assert_eq!(bridge.invoke(&fine).await?, NO_OBJECT_OUTPUT);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backend_panic_restores_ready_before_next_call() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let boom = create_named_image(dir.path(), "boom.png");
    let fine = create_named_image(dir.path(), "fine.png");
    let backend = StubBackend::answering(NO_OBJECT_OUTPUT)
        .with_panic("boom.png")
        .with_delay(Duration::from_millis(300));
    let (bridge, _home) = create_test_bridge(backend);
    bridge.initialize().await?;

    let first = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.invoke(&boom).await }
    });
    while bridge.state() != BridgeState::Executing {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let second = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.invoke(&fine).await }
    });

    match first.await? {
        Err(DetectionError::Execution(msg)) => assert!(msg.contains("panicked")),
        other => panic!("expected execution error, got {:?}", other),
    }

    // The second call holds the gate now; the snapshot must say so
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bridge.state(), BridgeState::Executing);

    assert_eq!(second.await??, NO_OBJECT_OUTPUT);
    assert_eq!(bridge.state(), BridgeState::Ready);

    Ok(())
}

#[tokio::test]
async fn test_missing_runtime_faults_bridge() -> anyhow::Result<()> {
    let image = create_test_image();
    let config = BridgeConfig::default()
        .with_runtime_home("/nonexistent/runtime")
        .with_fallback_homes(vec![])
        .with_interpreter("bin/python3");
    let bridge = InferenceBridge::new(config, StubBackend::answering(NO_OBJECT_OUTPUT));

    let err = bridge.invoke(image.path()).await.unwrap_err();
    assert!(matches!(err, DetectionError::Configuration(_)));
    assert_eq!(bridge.state(), BridgeState::Faulted);

    // Faulted is terminal for this instance
    let err = bridge.initialize().await.unwrap_err();
    assert!(matches!(err, DetectionError::Configuration(_)));
    assert_eq!(bridge.state(), BridgeState::Faulted);
    assert_eq!(bridge.backend().calls.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_backend_start_failure_faults_bridge() -> anyhow::Result<()> {
    let (bridge, _home) = create_test_bridge(StubBackend::failing_start());

    match bridge.initialize().await {
        Err(DetectionError::Configuration(msg)) => assert!(msg.contains("model weights")),
        other => panic!("expected configuration error, got {:?}", other),
    }
    assert_eq!(bridge.state(), BridgeState::Faulted);

    bridge.initialize().await.unwrap_err();
    assert_eq!(bridge.backend().starts.load(Ordering::SeqCst), 1, "no retry");

    Ok(())
}

#[tokio::test]
async fn test_shutdown_is_idempotent() -> anyhow::Result<()> {
    let image = create_test_image();
    let (bridge, _home) = create_test_bridge(StubBackend::answering(NO_OBJECT_OUTPUT));
    bridge.initialize().await?;

    bridge.shutdown().await;
    bridge.shutdown().await;
    assert_eq!(bridge.state(), BridgeState::Closed);
    assert_eq!(bridge.backend().stops.load(Ordering::SeqCst), 1);

    let err = bridge.invoke(image.path()).await.unwrap_err();
    assert!(matches!(err, DetectionError::Execution(_)));

    Ok(())
}

#[tokio::test]
async fn test_shutdown_before_initialize_skips_stop() -> anyhow::Result<()> {
    let (bridge, _home) = create_test_bridge(StubBackend::answering(NO_OBJECT_OUTPUT));
    bridge.shutdown().await;
    assert_eq!(bridge.state(), BridgeState::Closed);
    assert_eq!(bridge.backend().stops.load(Ordering::SeqCst), 0);
    Ok(())
}
