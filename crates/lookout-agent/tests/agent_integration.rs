//! End-to-end tests: a real monitor and a real agent on loopback.
//!
//! The agent discovers the monitor through an explicit discovery target
//! (the monitor's own address) instead of broadcast.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use lookout_agent::{Agent, CaptureError, FixedIdentity, FrameCapture, NoticeSink};
use lookout_core::{Frame, LookoutConfig, SessionId, SessionState};
use lookoutd::display::{DisplayError, DisplaySink, DisplayUpdate};
use lookoutd::registry::{RemovalReason, SessionEvent};
use lookoutd::Monitor;

// ============================================================================
// Constants
// ============================================================================

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Collaborator doubles
// ============================================================================

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<DisplayUpdate>>>);

impl RecordingSink {
    fn shown_lengths(&self) -> Vec<usize> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| match u {
                DisplayUpdate::Show(frame) => Some(frame.len()),
                DisplayUpdate::Clear => None,
            })
            .collect()
    }

    fn clears(&self) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|u| matches!(u, DisplayUpdate::Clear))
            .count()
    }
}

impl DisplaySink for RecordingSink {
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        self.0.lock().unwrap().push(DisplayUpdate::Show(frame.clone()));
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.0.lock().unwrap().push(DisplayUpdate::Clear);
        Ok(())
    }
}

/// Hands out queued frames, then reports itself unavailable.
#[derive(Default)]
struct ScriptedCapture(Mutex<VecDeque<Bytes>>);

impl ScriptedCapture {
    fn with_sizes(sizes: &[usize]) -> Self {
        Self(Mutex::new(
            sizes.iter().map(|&n| Bytes::from(vec![0xAB; n])).collect(),
        ))
    }
}

#[async_trait]
impl FrameCapture for ScriptedCapture {
    async fn capture(&self) -> Result<Bytes, CaptureError> {
        self.0
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CaptureError::Unavailable("script finished".into()))
    }
}

#[derive(Default)]
struct RecordingNotices(Mutex<Vec<String>>);

impl NoticeSink for RecordingNotices {
    fn notice(&self, text: &str) {
        self.0.lock().unwrap().push(text.to_string());
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Station {
    monitor: Monitor,
    display: RecordingSink,
    notices: Arc<RecordingNotices>,
    agent_cancel: CancellationToken,
}

fn base_config() -> LookoutConfig {
    let mut config = LookoutConfig::default();
    config.network.port = 0;
    config.network.receive_timeout_ms = 300;
    config.agent.ping_interval_ms = 50;
    config.agent.capture_interval_ms = 10;
    config
}

impl Station {
    async fn start(config: LookoutConfig, capture: ScriptedCapture) -> Self {
        let display = RecordingSink::default();
        let monitor = Monitor::start(
            &config,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            display.clone(),
            CancellationToken::new(),
        )
        .await
        .expect("start monitor");

        let mut agent_config = config;
        agent_config.agent.discovery_targets = vec![monitor.local_addr()];

        let notices = Arc::new(RecordingNotices::default());
        let agent_cancel = CancellationToken::new();
        let agent = Agent::bind(
            &agent_config,
            &FixedIdentity::new("alice"),
            Arc::new(capture),
            notices.clone(),
            agent_cancel.clone(),
        )
        .await
        .expect("bind agent");
        tokio::spawn(async move { agent.run().await });

        Self {
            monitor,
            display,
            notices,
            agent_cancel,
        }
    }

    /// Waits for a named session other than `not`.
    async fn wait_for_alice(&self, not: Option<SessionId>) -> SessionId {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            let sessions = self.monitor.registry().get_all_sessions().await;
            if let Some(view) = sessions
                .iter()
                .find(|v| v.display_name == "alice" && Some(v.id) != not)
            {
                return view.id;
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!("agent never registered");
    }

    async fn wait_until(&self, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if done() {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn stop(self) {
        self.agent_cancel.cancel();
        self.monitor.shutdown().await;
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_agent_discovers_and_registers() {
    let station = Station::start(base_config(), ScriptedCapture::default()).await;

    let id = station.wait_for_alice(None).await;
    let sessions = station.monitor.registry().get_all_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, id);
    assert_eq!(sessions[0].display_name, "alice");
    assert_eq!(sessions[0].state, SessionState::Idle);

    station.stop().await;
}

#[tokio::test]
async fn test_selected_agent_streams_frames_in_order() {
    let sizes = [1000, 1200, 900, 1100, 950];
    let station = Station::start(base_config(), ScriptedCapture::with_sizes(&sizes)).await;

    let id = station.wait_for_alice(None).await;
    station.monitor.registry().select(id).await.unwrap();

    let display = station.display.clone();
    station
        .wait_until(|| display.shown_lengths().len() >= sizes.len())
        .await;
    assert_eq!(station.display.shown_lengths(), sizes.to_vec());

    station.stop().await;
}

#[tokio::test]
async fn test_notice_reaches_agent_once() {
    let station = Station::start(base_config(), ScriptedCapture::default()).await;

    let id = station.wait_for_alice(None).await;
    let registry = station.monitor.registry().clone();
    registry.select(id).await.unwrap();
    registry.send_notice("Pencils down").await.unwrap();

    let notices = station.notices.clone();
    station
        .wait_until(|| !notices.0.lock().unwrap().is_empty())
        .await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(
        *station.notices.0.lock().unwrap(),
        vec!["Pencils down".to_string()]
    );

    station.stop().await;
}

#[tokio::test]
async fn test_stale_session_evicted_and_agent_reconnects() {
    let mut config = base_config();
    config.monitor.watchdog_grace_ms = 50;
    config.monitor.watchdog_interval_ms = 10;
    config.monitor.eviction_threshold_ms = 400;
    let station = Station::start(config, ScriptedCapture::default()).await;
    let registry = station.monitor.registry().clone();
    let mut events = registry.subscribe();

    let first = station.wait_for_alice(None).await;
    registry.select(first).await.unwrap();

    // A newer connection from the same address takes over the heartbeats,
    // so the agent's own session goes silent.
    let _interloper = TcpStream::connect(station.monitor.local_addr())
        .await
        .unwrap();

    let removed = timeout(WAIT_TIMEOUT, async {
        loop {
            if let SessionEvent::Removed { session_id, reason } = events.recv().await.unwrap() {
                return (session_id, reason);
            }
        }
    })
    .await
    .expect("agent session was never evicted");
    assert_eq!(removed, (first, RemovalReason::HeartbeatTimeout));

    // The agent notices the closed link and registers again.
    let second = station.wait_for_alice(Some(first)).await;
    assert!(second > first);
    assert_eq!(station.display.clears(), 1);
    assert_eq!(registry.slot_status().await.streaming, None);

    station.stop().await;
}

#[tokio::test]
async fn test_agent_survives_monitor_restart() {
    let station = Station::start(base_config(), ScriptedCapture::default()).await;
    station.wait_for_alice(None).await;

    let addr: SocketAddr = station.monitor.local_addr();
    let Station {
        monitor,
        agent_cancel,
        ..
    } = station;
    monitor.shutdown().await;

    let mut config = base_config();
    config.network.port = addr.port();
    let restarted = Monitor::start(
        &config,
        addr.ip(),
        RecordingSink::default(),
        CancellationToken::new(),
    )
    .await
    .expect("restart monitor on the same port");

    let deadline = Instant::now() + WAIT_TIMEOUT;
    let mut registered = false;
    while Instant::now() < deadline && !registered {
        registered = restarted
            .registry()
            .get_all_sessions()
            .await
            .iter()
            .any(|v| v.display_name == "alice");
        sleep(POLL_INTERVAL).await;
    }
    assert!(registered, "agent did not reconnect to the restarted monitor");

    agent_cancel.cancel();
    restarted.shutdown().await;
}
