use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use pulse_core::{
    RescanError,
    rescan::{
        CoordinatorSettings, RescanCoordinator, RescanKind, RescanPhase,
        SourceMode, WalletClients,
    },
    rpc::{HeightStream, RescanStream, RpcError, WalletRpc},
};
use tokio::{sync::mpsc, time::timeout};

#[derive(Default)]
struct ScriptedWallet {
    calls: Mutex<Vec<String>>,
    fail_import: bool,
    fail_discover: bool,
    rescan_delay: Duration,
}

impl ScriptedWallet {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl WalletRpc for ScriptedWallet {
    async fn discover_usage(&self) -> Result<(), RpcError> {
        self.calls.lock().push("discoverusage".into());
        if self.fail_discover {
            return Err(RpcError::Rpc {
                method: "discoverusage",
                code: -1,
                message: "wallet busy".into(),
            });
        }
        Ok(())
    }

    async fn import_xpub(
        &self,
        account: &str,
        xpub: &str,
    ) -> Result<(), RpcError> {
        self.calls.lock().push(format!("importxpub {account} {xpub}"));
        if self.fail_import {
            return Err(RpcError::Rpc {
                method: "importxpub",
                code: -4,
                message: "account exists".into(),
            });
        }
        Ok(())
    }

    async fn rescan_wallet(&self, begin_height: i64) -> Result<(), RpcError> {
        self.calls.lock().push(format!("rescanwallet {begin_height}"));
        tokio::time::sleep(self.rescan_delay).await;
        Ok(())
    }
}

/// Rescan stream fed by the test through a channel.
struct ScriptedStream {
    begin_heights: Mutex<Vec<i32>>,
    feed: Mutex<Option<mpsc::UnboundedReceiver<Result<i64, RpcError>>>>,
}

impl ScriptedStream {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<i64, RpcError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Arc::new(Self {
            begin_heights: Mutex::new(Vec::new()),
            feed: Mutex::new(Some(rx)),
        });
        (stream, tx)
    }
}

#[async_trait]
impl RescanStream for ScriptedStream {
    async fn rescan(&self, begin_height: i32) -> Result<HeightStream, RpcError> {
        self.begin_heights.lock().push(begin_height);
        let rx = self
            .feed
            .lock()
            .take()
            .ok_or_else(|| RpcError::Config("stream already opened".into()))?;

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

fn fast_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        settle_delay: Duration::from_millis(10),
        step_timeout: Duration::from_millis(500),
        watch_interval: Duration::from_millis(10),
        ..CoordinatorSettings::default()
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let result = timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn second_trigger_is_rejected_while_first_runs() {
    let wallet = Arc::new(ScriptedWallet::default());
    let (stream, feed) = ScriptedStream::new();
    let coordinator = RescanCoordinator::new(
        WalletClients {
            wallet: Some(wallet.clone()),
            stream: Some(stream.clone()),
            log_watch: None,
        },
        fast_settings(),
    );

    let accepted = coordinator.trigger_rescan(100).unwrap();
    assert_eq!(accepted.begin_height, 100);
    assert!(matches!(
        coordinator.trigger_rescan(0),
        Err(RescanError::AlreadyRunning)
    ));
    assert!(matches!(
        coordinator.trigger_import("dpubABC", "savings"),
        Err(RescanError::AlreadyRunning)
    ));

    wait_until("stream to open", || coordinator.is_streaming()).await;
    assert_eq!(*stream.begin_heights.lock(), vec![100]);
    assert_eq!(wallet.calls(), vec!["discoverusage".to_string()]);

    drop(feed);
    wait_until("slot release", || coordinator.active().is_none()).await;
    assert!(coordinator.trigger_rescan(0).is_ok());
}

#[tokio::test]
async fn stream_updates_reach_subscribers_then_hub_closes() {
    let wallet = Arc::new(ScriptedWallet::default());
    let (stream, feed) = ScriptedStream::new();
    let coordinator = RescanCoordinator::new(
        WalletClients {
            wallet: Some(wallet.clone()),
            stream: Some(stream),
            log_watch: None,
        },
        fast_settings(),
    );
    let mut subscription = coordinator.hub().subscribe();

    coordinator.trigger_rescan(0).unwrap();
    assert_eq!(coordinator.pending().map(|p| p.grace_seconds), Some(8));

    wait_until("stream to open", || coordinator.is_streaming()).await;
    for height in [1_000, 2_000, 3_000] {
        feed.send(Ok(height)).unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let sample = timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("sample delivered")
            .expect("hub still open");
        assert!(sample.is_active);
        seen.push(sample.scanned_height);
    }
    assert_eq!(seen, vec![1_000, 2_000, 3_000]);
    assert!(coordinator.pending().is_none(), "first update clears pending");
    assert_eq!(
        coordinator.snapshot().latest.map(|s| s.scanned_height),
        Some(3_000)
    );

    drop(feed);
    let end = timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("hub closes when the stream ends");
    assert!(end.is_none());

    wait_until("slot release", || coordinator.active().is_none()).await;
    assert_eq!(coordinator.hub().subscriber_count(), 0);
    assert!(coordinator.hub().latest().is_none());
}

#[tokio::test]
async fn import_validates_prefix_and_defaults_account() {
    let wallet = Arc::new(ScriptedWallet::default());
    let (stream, feed) = ScriptedStream::new();
    let coordinator = RescanCoordinator::new(
        WalletClients {
            wallet: Some(wallet.clone()),
            stream: Some(stream.clone()),
            log_watch: None,
        },
        fast_settings(),
    );

    let err = coordinator.trigger_import("xpub661MyMw", "").unwrap_err();
    assert!(matches!(err, RescanError::Validation(_)));
    assert!(err.to_string().contains("dpub"));
    assert!(coordinator.active().is_none());

    let accepted = coordinator.trigger_import("tpubVhnMyGb", "  ").unwrap();
    assert_eq!(accepted.account.as_deref(), Some("imported"));
    assert_eq!(
        coordinator.active().map(|active| active.kind),
        Some(RescanKind::Import)
    );
    assert_eq!(coordinator.pending().map(|p| p.grace_seconds), Some(30));

    wait_until("stream to open", || coordinator.is_streaming()).await;
    assert_eq!(
        wallet.calls(),
        vec![
            "importxpub imported tpubVhnMyGb".to_string(),
            "discoverusage".to_string(),
        ]
    );
    assert_eq!(*stream.begin_heights.lock(), vec![0]);

    drop(feed);
    wait_until("slot release", || coordinator.active().is_none()).await;
}

#[tokio::test]
async fn failed_import_stops_the_operation() {
    let wallet = Arc::new(ScriptedWallet {
        fail_import: true,
        ..ScriptedWallet::default()
    });
    let coordinator = RescanCoordinator::new(
        WalletClients {
            wallet: Some(wallet.clone()),
            stream: None,
            log_watch: None,
        },
        fast_settings(),
    );

    coordinator.trigger_import("dpubABC", "cold").unwrap();
    wait_until("slot release", || coordinator.active().is_none()).await;

    assert_eq!(wallet.calls(), vec!["importxpub cold dpubABC".to_string()]);
    assert!(coordinator.pending().is_none());
}

#[tokio::test]
async fn discovery_failure_still_rescans_over_json_rpc() {
    let wallet = Arc::new(ScriptedWallet {
        fail_discover: true,
        rescan_delay: Duration::from_millis(100),
        ..ScriptedWallet::default()
    });
    let (stream, _feed) = ScriptedStream::new();
    let coordinator = RescanCoordinator::new(
        WalletClients {
            wallet: Some(wallet.clone()),
            stream: Some(stream.clone()),
            log_watch: None,
        },
        CoordinatorSettings {
            source_mode: SourceMode::Log,
            ..fast_settings()
        },
    );

    coordinator.trigger_rescan(42).unwrap();
    wait_until("polling phase", || {
        coordinator.active().map(|active| active.phase)
            == Some(RescanPhase::Polling)
    })
    .await;
    assert!(!coordinator.is_streaming());

    wait_until("slot release", || coordinator.active().is_none()).await;
    assert_eq!(
        wallet.calls(),
        vec!["discoverusage".to_string(), "rescanwallet 42".to_string()]
    );
    assert!(stream.begin_heights.lock().is_empty());
}

#[tokio::test]
async fn shutdown_cancels_running_operation() {
    let wallet = Arc::new(ScriptedWallet::default());
    let (stream, feed) = ScriptedStream::new();
    let coordinator = RescanCoordinator::new(
        WalletClients {
            wallet: Some(wallet),
            stream: Some(stream),
            log_watch: None,
        },
        fast_settings(),
    );
    let mut subscription = coordinator.hub().subscribe();

    coordinator.trigger_rescan(0).unwrap();
    wait_until("stream to open", || coordinator.is_streaming()).await;
    feed.send(Ok(10)).unwrap();
    assert_eq!(
        timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .map(|s| s.scanned_height),
        Some(10)
    );

    timeout(Duration::from_secs(5), coordinator.shutdown())
        .await
        .expect("shutdown completes");

    assert!(coordinator.active().is_none());
    assert!(subscription.recv().await.is_none());
    assert!(matches!(
        coordinator.trigger_rescan(0),
        Err(RescanError::UpstreamUnavailable(_))
    ));
}

#[tokio::test]
async fn negative_begin_height_is_a_validation_error() {
    let coordinator = RescanCoordinator::new(
        WalletClients {
            wallet: Some(Arc::new(ScriptedWallet::default())),
            ..WalletClients::default()
        },
        fast_settings(),
    );

    assert!(matches!(
        coordinator.trigger_rescan(-5),
        Err(RescanError::Validation(_))
    ));
    assert!(coordinator.active().is_none());
}
