//! Integration tests for the poll scheduler and the aggregation pipeline

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streetsense_agent::core::CSV_HEADER;
use streetsense_agent::scheduler::{self, TickOutcome};
use streetsense_agent::sink::{RecordSink, SinkError};
use streetsense_agent::{
    DetectionGateway, DetectionRecord, ExportError, GatewayError, PollScheduler, RawPayload,
    SchedulerState, SessionSummary,
};

/// Gateway that replays a fixed script of poll results, then empty payloads.
struct ScriptedGateway {
    script: Mutex<VecDeque<Result<Value, GatewayError>>>,
    polls: AtomicUsize,
    stops: AtomicUsize,
}

impl ScriptedGateway {
    fn new(script: Vec<Result<Value, GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            polls: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionGateway for ScriptedGateway {
    async fn start(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn poll(&self) -> Result<RawPayload, GatewayError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(body)) => RawPayload::from_json(body),
            Some(Err(e)) => Err(e),
            None => Ok(RawPayload::default()),
        }
    }
}

/// Sink that remembers what it was given and can be told to fail.
#[derive(Default)]
struct MemorySink {
    stored: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(&self, record: &DetectionRecord) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Network("store offline".to_string()));
        }
        self.stored.lock().unwrap().push(record.id.clone());
        Ok(())
    }
}

fn frame(ids: &[&str]) -> Value {
    let pedestrians: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "id": id, "timestamp": "2024-01-01T00:00:00Z", "risk_level": "medium" }))
        .collect();
    json!({
        "totalPedestrians": ids.len(),
        "highRisk": 0,
        "mediumRisk": ids.len(),
        "lowRisk": 0,
        "pedestrians": pedestrians
    })
}

fn unreachable() -> GatewayError {
    GatewayError::Network("connection refused".to_string())
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let gateway = ScriptedGateway::new(vec![Ok(json!({
        "totalPedestrians": 1,
        "highRisk": 1,
        "mediumRisk": 0,
        "lowRisk": 0,
        "pedestrians": [{
            "id": "p1",
            "timestamp": "2024-01-01T00:00:00Z",
            "risk_level": "high",
            "confidence": 0.9,
            "position_x": 10,
            "position_y": 20
        }]
    }))]);
    let mut poller = PollScheduler::new(gateway.clone());

    poller.start().await.unwrap();
    poller.tick().await;

    let view = poller.view();
    assert_eq!(
        view.summary,
        SessionSummary {
            total: 1,
            high: 1,
            medium: 0,
            low: 0
        }
    );
    assert_eq!(view.series.len(), 1);
    let sample = view.series[0];
    assert_eq!((sample.total, sample.high, sample.medium, sample.low), (1, 1, 0, 0));

    let session_id = view.session_id.unwrap();
    let csv = poller.export().unwrap();
    assert_eq!(
        csv.content,
        format!("{CSV_HEADER}\np1,2024-01-01T00:00:00Z,high,0.9,10,20,{session_id}")
    );
    assert_eq!(csv.file_name, format!("pedestrian-data-{session_id}.csv"));
}

#[tokio::test]
async fn test_scheduler_survives_poll_failures() {
    let gateway = ScriptedGateway::new(vec![
        Ok(frame(&["a", "b"])),
        Err(unreachable()),
        Err(GatewayError::Malformed("expected value at line 1".to_string())),
        Ok(frame(&["b", "c"])),
    ]);
    let mut poller = PollScheduler::new(gateway.clone());
    poller.start().await.unwrap();

    assert!(matches!(poller.tick().await, TickOutcome::Polled { accepted: 2, .. }));
    assert!(!poller.view().connection_error);

    assert_eq!(poller.tick().await, TickOutcome::Failed);
    assert!(poller.view().connection_error);
    assert_eq!(poller.state(), SchedulerState::Active);

    assert_eq!(poller.tick().await, TickOutcome::Failed);
    assert!(poller.view().connection_error);
    assert_eq!(poller.view().record_count, 2);

    assert_eq!(
        poller.tick().await,
        TickOutcome::Polled {
            accepted: 1,
            duplicates: 1
        }
    );
    let view = poller.view();
    assert!(!view.connection_error);
    assert_eq!(view.state, SchedulerState::Active);
    assert_eq!(view.record_count, 3);
    assert_eq!(view.series.len(), 2);

    let history = poller.session().unwrap().history();
    for id in ["a", "b", "c"] {
        assert!(history.contains(id), "missing {id}");
    }

    let stats = poller.stats().snapshot();
    assert_eq!(stats.polls_ok, 2);
    assert_eq!(stats.polls_failed, 2);
    assert_eq!(stats.duplicates_dropped, 1);
}

#[tokio::test]
async fn test_sink_receives_only_new_records() {
    let gateway = ScriptedGateway::new(vec![Ok(frame(&["a", "a", "b"])), Ok(frame(&["b", "c"]))]);
    let sink = Arc::new(MemorySink::default());
    let mut poller = PollScheduler::new(gateway).with_sink(Some(sink.clone()));

    poller.start().await.unwrap();
    poller.tick().await;
    poller.tick().await;
    poller.flush_sink().await;

    assert_eq!(*sink.stored.lock().unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_sink_failure_does_not_block_pipeline() {
    let gateway = ScriptedGateway::new(vec![Ok(frame(&["a", "b"]))]);
    let sink = Arc::new(MemorySink {
        fail: true,
        ..MemorySink::default()
    });
    let mut poller = PollScheduler::new(gateway).with_sink(Some(sink));

    poller.start().await.unwrap();
    assert!(matches!(poller.tick().await, TickOutcome::Polled { accepted: 2, .. }));
    assert_eq!(poller.view().record_count, 2);
    assert!(!poller.view().connection_error);

    poller.flush_sink().await;
    assert_eq!(poller.stats().snapshot().sink_failures, 2);
}

/// Sink that takes a long time per record and then fails.
struct StallingSink {
    delay: Duration,
    attempts: AtomicUsize,
}

#[async_trait]
impl RecordSink for StallingSink {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn store(&self, _record: &DetectionRecord) -> Result<(), SinkError> {
        tokio::time::sleep(self.delay).await;
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Network("timed out".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_sink_does_not_hold_up_stop_or_reads() {
    let gateway = ScriptedGateway::new(vec![Ok(frame(&["a", "b", "c", "d", "e"]))]);
    let sink = Arc::new(StallingSink {
        delay: Duration::from_secs(10),
        attempts: AtomicUsize::new(0),
    });
    let poller = PollScheduler::new(gateway.clone())
        .with_interval(Duration::from_secs(1))
        .with_sink(Some(sink.clone()));
    let (handle, task) = scheduler::spawn(poller);

    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.polls(), 1);

    let before = tokio::time::Instant::now();
    let view = handle.view().await.unwrap();
    assert_eq!(view.record_count, 5);
    handle.stop().await.unwrap();
    assert!(before.elapsed() < Duration::from_secs(1));
    assert_eq!(handle.view().await.unwrap().state, SchedulerState::Idle);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 0);

    drop(handle);
    let mut poller = task.await.unwrap();
    poller.close_sink().await;
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 5);
    assert_eq!(poller.stats().snapshot().sink_failures, 5);
}

#[tokio::test(start_paused = true)]
async fn test_slow_sink_does_not_delay_cadence() {
    let gateway = ScriptedGateway::new(vec![Ok(frame(&["a", "b", "c"]))]);
    let sink = Arc::new(StallingSink {
        delay: Duration::from_secs(10),
        attempts: AtomicUsize::new(0),
    });
    let poller = PollScheduler::new(gateway.clone())
        .with_interval(Duration::from_secs(1))
        .with_sink(Some(sink));
    let (handle, task) = scheduler::spawn(poller);

    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    // Polls at 0, 1, 2 and 3 while the sink is still on its first record
    assert_eq!(gateway.polls(), 4);

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn test_records_survive_stop_until_next_start() {
    let gateway = ScriptedGateway::new(vec![Ok(frame(&["a"]))]);
    let mut poller = PollScheduler::new(gateway);

    poller.start().await.unwrap();
    poller.tick().await;
    poller.stop().await.unwrap();

    assert_eq!(poller.state(), SchedulerState::Idle);
    assert_eq!(poller.export().unwrap().rows, 1);

    poller.start().await.unwrap();
    assert_eq!(poller.view().record_count, 0);
    assert_eq!(poller.export(), Err(ExportError::Empty));
}

#[tokio::test(start_paused = true)]
async fn test_driver_polls_on_cadence() {
    let gateway = ScriptedGateway::new(vec![]);
    let poller = PollScheduler::new(gateway.clone()).with_interval(Duration::from_secs(1));
    let (handle, task) = scheduler::spawn(poller);

    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    // Immediate first poll, then one per second
    assert_eq!(gateway.polls(), 4);
    assert_eq!(handle.view().await.unwrap().series.len(), 4);

    drop(handle);
    let poller = task.await.unwrap();
    assert_eq!(poller.state(), SchedulerState::Idle);
    assert_eq!(gateway.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_cadence() {
    let gateway = ScriptedGateway::new(vec![]);
    let poller = PollScheduler::new(gateway.clone()).with_interval(Duration::from_secs(1));
    let (handle, task) = scheduler::spawn(poller);

    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    handle.stop().await.unwrap();
    let polls_at_stop = gateway.polls();
    assert!(polls_at_stop > 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(gateway.polls(), polls_at_stop);
    assert_eq!(handle.view().await.unwrap().state, SchedulerState::Idle);

    // A second stop is a no-op and does not signal the service again
    handle.stop().await.unwrap();
    assert_eq!(gateway.stops.load(Ordering::SeqCst), 1);

    drop(handle);
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reads_between_ticks_do_not_delay_cadence() {
    let gateway = ScriptedGateway::new(vec![]);
    let poller = PollScheduler::new(gateway.clone()).with_interval(Duration::from_secs(1));
    let (handle, task) = scheduler::spawn(poller);

    handle.start().await.unwrap();
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.view().await.unwrap();
    }

    // t = 2.5s: polls at 0, 1 and 2
    assert_eq!(gateway.polls(), 3);

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn test_handle_reports_closed_scheduler() {
    let gateway = ScriptedGateway::new(vec![]);
    let (handle, task) = scheduler::spawn(PollScheduler::new(gateway));
    task.abort();
    let _ = task.await;

    assert!(handle.view().await.is_err());
}
