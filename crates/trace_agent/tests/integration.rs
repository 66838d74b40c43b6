mod common;

use common::{produce, ScriptedCollector};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use trace_agent::{AgentConfig, ChannelState, SegmentId, Tag, TraceAgent};

fn fast_config() -> AgentConfig {
    let mut config = AgentConfig::new("orders");
    config.collector.channel_check_interval = Duration::from_millis(500);
    config.collector.register_check_interval = Duration::from_millis(100);
    config.collector.transmit_interval = Duration::from_millis(20);
    config.collector.shutdown_grace = Duration::from_secs(1);
    config
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_delivery() {
    let collector = Arc::new(ScriptedCollector::new());
    let agent = TraceAgent::start(fast_config(), Arc::clone(&collector)).unwrap();

    // First health tick fires immediately and connects.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(agent.observe().channel_state, ChannelState::Connected);

    let mut assembler = agent.assembler();
    for i in 0..10 {
        let seg = SegmentId(i);
        let entry = assembler.on_span_start("/orders/place", seg);
        let child = assembler.on_span_start("validate", seg);
        assembler.on_span_end(child, vec![Tag::new("step", i.to_string())]);
        assembler.on_span_end(entry, Vec::new());
    }

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(collector.received_segments(), 10);

    let snapshot = agent.observe();
    assert_eq!(snapshot.segments_sent, 10);
    assert_eq!(snapshot.segments_enqueued, 10);
    assert_eq!(snapshot.buffered, 0);
    assert_eq!(snapshot.service_code, 1);
    assert_eq!(snapshot.instance_code, 2);
    assert!(snapshot.last_transmit_millis > 0);
    assert!(!collector.heartbeats.lock().unwrap().is_empty());

    let last = agent.shutdown().await;
    assert_eq!(last.segments_sent, 10);
}

#[tokio::test(start_paused = true)]
async fn test_sampling_limits_admissions() {
    let collector = Arc::new(ScriptedCollector::new());
    let mut config = fast_config();
    config.agent.sample_n_per_3_secs = 2;
    let agent = TraceAgent::start(config, Arc::clone(&collector)).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    produce(&agent, &["/a", "/b", "/c", "/d", "/e", "/logo.png"]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = agent.observe();
    assert_eq!(snapshot.segments_sent, 2);
    assert_eq!(snapshot.segments_sampled_out, 3);
    assert_eq!(snapshot.segments_ignored, 1);

    agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_collector_discards_without_blocking() {
    let collector = Arc::new(ScriptedCollector::new());
    ScriptedCollector::set(&collector.connect_ok, false);
    let mut config = fast_config();
    config.buffer.channel_size = 1;
    config.buffer.buffer_size = 8;
    let agent = TraceAgent::start(config, Arc::clone(&collector)).unwrap();

    let names: Vec<String> = (0..50).map(|i| format!("/op{}", i)).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    produce(&agent, &names);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = agent.observe();
    assert_eq!(snapshot.channel_state, ChannelState::Disconnected);
    assert_eq!(snapshot.buffer_overflow, 42);
    assert_eq!(snapshot.discarded_disconnected, 8);
    assert_eq!(snapshot.buffered, 0);
    assert_eq!(collector.send_attempts.load(std::sync::atomic::Ordering::SeqCst), 0);

    agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_hung_transmit_after_grace() {
    let collector = Arc::new(ScriptedCollector::new());
    ScriptedCollector::set(&collector.hang_send, true);
    let agent = TraceAgent::start(fast_config(), Arc::clone(&collector)).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    produce(&agent, &["/stuck"]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = tokio::time::Instant::now();
    let snapshot = agent.shutdown().await;
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(snapshot.segments_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_buffered_segments() {
    let collector = Arc::new(ScriptedCollector::new());
    let mut config = fast_config();
    config.collector.transmit_interval = Duration::from_secs(60);
    let agent = TraceAgent::start(config, Arc::clone(&collector)).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    produce(&agent, &["/a", "/b", "/c"]);
    let snapshot = agent.shutdown().await;

    assert_eq!(snapshot.segments_sent, 3);
    assert_eq!(collector.received_segments(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_producers_account_for_every_segment() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 200;

    let collector = Arc::new(ScriptedCollector::new());
    let mut config = fast_config();
    config.buffer.channel_size = 4;
    config.buffer.buffer_size = 16;
    let agent = Arc::new(TraceAgent::start(config, Arc::clone(&collector)).unwrap());

    // Wait for the first connect.
    for _ in 0..100 {
        if agent.observe().channel_state == ChannelState::Connected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(agent.observe().channel_state, ChannelState::Connected);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let agent = Arc::clone(&agent);
            thread::spawn(move || {
                let mut assembler = agent.assembler();
                for i in 0..PER_THREAD {
                    let span = assembler
                        .on_span_start(&format!("/t{}/op{}", t, i), SegmentId::random());
                    assembler.on_span_end(span, Vec::new());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let agent = Arc::try_unwrap(agent).unwrap();
    let snapshot = agent.shutdown().await;

    assert_eq!(
        snapshot.segments_sent + snapshot.buffer_overflow,
        (THREADS * PER_THREAD) as u64
    );
    assert_eq!(snapshot.segments_enqueued, snapshot.segments_sent);
    assert_eq!(collector.received_segments() as u64, snapshot.segments_sent);
}

#[tokio::test(start_paused = true)]
async fn test_start_from_json_config() {
    let config = AgentConfig::from_json_str(
        r#"{
            "agent": { "service_name": "billing", "namespace": "eu" },
            "collector": { "backend_service": ["collector-1:11800", "collector-2:11800"] }
        }"#,
    )
    .unwrap();
    let collector = Arc::new(ScriptedCollector::new());
    let agent = TraceAgent::start(config, Arc::clone(&collector)).unwrap();

    assert_eq!(agent.manager().service_name(), "eu/billing");
    tokio::time::sleep(Duration::from_millis(10)).await;
    agent.shutdown().await;
    assert_eq!(collector.connects.lock().unwrap()[0], "collector-1:11800");
}
