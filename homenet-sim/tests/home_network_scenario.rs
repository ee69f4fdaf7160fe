//! End-to-end runs of the reference home network scenario.

use std::fs;

use homenet_core::config::HomeNetworkConfig;
use homenet_core::control::{ControlMessage, SessionState};
use homenet_core::trace::signals;
use homenet_core::{SimError, SimTime, StopReason};
use homenet_sim::HomeNetworkScenario;

fn short_config(seconds: u64) -> HomeNetworkConfig {
    let mut config = HomeNetworkConfig::default();
    config.run.simulation_time = SimTime::from_secs(seconds);
    config
}

#[test]
fn test_reference_run_follows_control_plan_and_sampling_horizon() {
    let report = HomeNetworkScenario::build(HomeNetworkConfig::default())
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.run.stop_reason, StopReason::StopTime);
    assert_eq!(report.run.final_time, SimTime::from_secs(300));
    assert!(report.run.recoverable.is_empty(), "{:?}", report.run.recoverable);

    let transitions: Vec<_> = report
        .client_transitions()
        .into_iter()
        .map(|t| (t.time, t.message, t.from, t.to))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (
                SimTime::from_secs(5),
                ControlMessage::Setup,
                SessionState::Init,
                SessionState::Ready
            ),
            (
                SimTime::from_secs(6),
                ControlMessage::Play,
                SessionState::Ready,
                SessionState::Playing
            ),
            (
                SimTime::from_secs(10),
                ControlMessage::Pause,
                SessionState::Playing,
                SessionState::Paused
            ),
            (
                SimTime::from_secs(13),
                ControlMessage::Play,
                SessionState::Paused,
                SessionState::Playing
            ),
        ]
    );

    // Samples at 0, 100 ms, ..., 21 s and none beyond
    assert_eq!(report.throughput.len(), 211);
    assert!(report.throughput.iter().all(|s| s.time <= SimTime::from_secs(21)));
    assert_eq!(report.throughput.last().map(|s| s.time), Some(SimTime::from_secs(21)));
    assert!(report.throughput.iter().all(|s| s.mbps >= 0.0));
    assert!(
        report
            .throughput
            .iter()
            .filter(|s| s.time <= SimTime::from_secs(6))
            .all(|s| s.mbps == 0.0)
    );
    assert!(report.throughput.iter().any(|s| s.mbps > 0.0));

    assert!(report.stream_bytes_received > 0);
    assert_eq!(report.web_pages_completed.len(), 2);
    assert!(report.web_pages_completed.iter().all(|pages| *pages > 0));
    assert!(report.web_bytes_received > 0);
    assert!(!report.loss_reports.is_empty());
}

#[test]
fn test_same_seed_reproduces_run() {
    let first = HomeNetworkScenario::build(short_config(40)).unwrap().run().unwrap();
    let second = HomeNetworkScenario::build(short_config(40)).unwrap().run().unwrap();

    assert_eq!(first.throughput, second.throughput);
    assert_eq!(first.transitions, second.transitions);
    assert_eq!(first.loss_reports, second.loss_reports);
    assert_eq!(first.web_bytes_received, second.web_bytes_received);
    assert_eq!(first.run.events_executed, second.run.events_executed);
    assert_eq!(first.run.signal_counts, second.run.signal_counts);
}

#[test]
fn test_trace_file_holds_one_json_record_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    let mut config = short_config(25);
    config.run.trace_file = Some(path.clone());

    let report = HomeNetworkScenario::build(config).unwrap().run().unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    let records: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let fired: u64 = report.run.signal_counts.values().sum();
    assert_eq!(records.len() as u64, fired);

    let throughput = records
        .iter()
        .filter(|r| r["signal"] == signals::STREAM_THROUGHPUT)
        .count();
    assert_eq!(throughput, 211);
    assert!(records.iter().all(|r| r["time_ns"].is_u64()));
    assert!(records.windows(2).all(|w| w[0]["time_ns"].as_u64() <= w[1]["time_ns"].as_u64()));
}

#[test]
fn test_too_few_stations_rejected() {
    let mut config = HomeNetworkConfig::default();
    config.topology.n_wifi = 2;

    let result = HomeNetworkScenario::build(config);

    assert!(matches!(result, Err(SimError::Configuration { .. })));
}

#[test]
fn test_extra_stations_stay_idle() {
    let mut config = short_config(20);
    config.topology.n_wifi = 8;

    let scenario = HomeNetworkScenario::build(config).unwrap();
    assert_eq!(scenario.network().stations().len(), 8);
    let report = scenario.run().unwrap();

    assert_eq!(report.client_transitions().len(), 4);
    assert!(report.stream_bytes_received > 0);
}
