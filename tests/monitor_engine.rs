use std::{collections::BTreeSet, time::Duration};

use regwatch::{
    core::{
        bus::{channel_pair, ConsumerBus, MonitorCommand, MonitorEvent},
        config::MonitorConfig,
    },
    MonitorHandle, PollEngine, RegisterClient, SimulatedRegisterClient,
};

type Events = ConsumerBus<MonitorCommand, MonitorEvent>;

fn test_config() -> MonitorConfig {
    MonitorConfig {
        initial_monitored: Vec::new(),
        ..MonitorConfig::default()
    }
}

fn engine(config: MonitorConfig) -> (PollEngine, SimulatedRegisterClient, Events) {
    let controller = SimulatedRegisterClient::new();
    let (consumer, worker) = channel_pair();
    let engine = PollEngine::new(config, Box::new(controller.clone()), worker);
    (engine, controller, consumer)
}

async fn started(config: MonitorConfig) -> (PollEngine, SimulatedRegisterClient, Events) {
    let (mut engine, controller, events) = engine(config);
    engine.start().await;
    drain(&events);
    (engine, controller, events)
}

fn drain(events: &Events) -> Vec<MonitorEvent> {
    events.events.try_iter().collect()
}

fn messages(events: &[MonitorEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            MonitorEvent::Log(entry) => Some(entry.message.clone()),
            _ => None,
        })
        .collect()
}

fn updates(events: &[MonitorEvent]) -> Vec<(u16, u16)> {
    events
        .iter()
        .filter_map(|event| match event {
            MonitorEvent::RegisterUpdated { address, value } => Some((*address, *value)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_start_logs_connection() {
    let (mut engine, _controller, events) = engine(test_config());
    engine.start().await;
    let lines = messages(&drain(&events));
    assert_eq!(lines, vec!["Modbus server connected (simulated)".to_string()]);
}

#[tokio::test]
async fn test_initial_monitored_are_registered() {
    let (mut engine, _controller, events) = engine(MonitorConfig::default());
    engine.start().await;

    assert_eq!(engine.monitored().iter().copied().collect::<Vec<_>>(), vec![138, 202]);
    assert_eq!(engine.pending().len(), 2);
    let lines = messages(&drain(&events));
    assert!(lines.contains(&"Register 202 monitoring started".to_string()));
}

#[tokio::test]
async fn test_reset_zeroes_range_with_one_bulk_write() {
    let (mut engine, controller, events) = started(test_config()).await;
    controller.set_values(128, &[5; 128]);

    engine.handle_command(MonitorCommand::RequestReset).await;
    engine.run_cycle().await;

    assert!((128..256).all(|address| controller.value(address) == 0));
    assert_eq!(controller.bulk_write_count(), 1);
    assert_eq!(controller.write_count(), 0);

    let lines = messages(&drain(&events));
    let completions = lines.iter().filter(|l| *l == "Register reset complete").count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn test_reset_falls_back_to_single_writes() {
    let (mut engine, controller, events) = started(test_config()).await;
    controller.set_values(128, &[9; 128]);
    controller.reject_bulk_writes(true);

    engine.handle_command(MonitorCommand::RequestReset).await;
    engine.run_cycle().await;

    assert!((128..256).all(|address| controller.value(address) == 0));
    assert_eq!(controller.write_count(), 128);

    let lines = messages(&drain(&events));
    assert!(lines.iter().any(|l| l.starts_with("Bulk reset failed")));
    let completions = lines.iter().filter(|l| *l == "Register reset complete").count();
    assert_eq!(completions, 1);

    // The request is consumed even though the bulk path failed.
    engine.run_cycle().await;
    let lines = messages(&drain(&events));
    assert!(!lines.iter().any(|l| l.starts_with("Resetting registers")));
}

#[tokio::test]
async fn test_write_reads_back_into_cache() {
    let (mut engine, controller, events) = started(test_config()).await;
    engine.add_monitored(138);
    engine.run_cycle().await;
    drain(&events);

    engine
        .handle_command(MonitorCommand::WriteRegister {
            address: 138,
            value: 42,
        })
        .await;

    let seen = drain(&events);
    assert_eq!(controller.value(138), 42);
    assert_eq!(engine.cached(138), Some(42));
    assert_eq!(updates(&seen), vec![(138, 42)]);
    assert!(messages(&seen).contains(&"Register 138 read back: 42".to_string()));
    assert_eq!(
        seen.last(),
        Some(&MonitorEvent::WriteResult {
            address: 138,
            success: true
        })
    );
}

#[tokio::test]
async fn test_rejected_write_reports_failure() {
    let (mut engine, controller, events) = started(test_config()).await;
    controller.fail_writes_at(140);

    engine.write_register(140, 1).await;

    let seen = drain(&events);
    assert!(seen.contains(&MonitorEvent::WriteResult {
        address: 140,
        success: false
    }));
    assert!(messages(&seen)
        .iter()
        .any(|l| l.contains("Write of value 1 to register 140 failed")));
}

#[tokio::test]
async fn test_write_while_disconnected() {
    let (mut engine, controller, events) = engine(test_config());
    controller.refuse_connect(true);
    engine.start().await;
    drain(&events);

    engine.write_register(130, 5).await;
    engine.handle_command(MonitorCommand::RequestReset).await;
    engine.run_cycle().await;

    let seen = drain(&events);
    assert!(seen.contains(&MonitorEvent::WriteResult {
        address: 130,
        success: false
    }));
    let lines = messages(&seen);
    assert_eq!(
        lines
            .iter()
            .filter(|l| l.contains("Modbus connection is not active"))
            .count(),
        2
    );
    assert_eq!(controller.write_count(), 0);
}

#[tokio::test]
async fn test_dropped_link_is_reported_once_and_recovers() {
    let (mut engine, controller, events) = started(test_config()).await;
    engine.add_monitored(138);
    engine.run_cycle().await;
    drain(&events);

    controller.disconnect();
    controller.refuse_connect(true);
    controller.set_value(138, 6);
    for _ in 0..5 {
        engine.run_cycle().await;
    }

    let seen = drain(&events);
    let lost = messages(&seen)
        .iter()
        .filter(|l| l.starts_with("Modbus connection to simulated lost"))
        .count();
    assert_eq!(lost, 1);
    assert!(updates(&seen).is_empty());

    controller.refuse_connect(false);
    engine.run_cycle().await;

    let seen = drain(&events);
    assert!(messages(&seen).contains(&"Modbus server reconnected (simulated)".to_string()));
    assert_eq!(updates(&seen), vec![(138, 6)]);
    assert_eq!(engine.cached(138), Some(6));
}

#[tokio::test]
async fn test_sweep_logs_changes_in_order_and_skips_exclusions() {
    let (mut engine, controller, events) = started(test_config()).await;
    engine.run_cycle().await;
    drain(&events);

    controller.set_value(211, 9);
    controller.set_value(150, 3);
    controller.set_value(161, 4);
    controller.set_value(140, 1);
    controller.set_value(254, 2);
    engine.run_cycle().await;

    let lines = messages(&drain(&events));
    assert_eq!(
        lines,
        vec![
            String::new(),
            "Register 140: 1".to_string(),
            "Register 150: 3".to_string(),
            "Register 254: 2".to_string(),
        ]
    );
    // Excluded addresses still track their latest value.
    assert_eq!(engine.cached(211), Some(9));
}

#[tokio::test]
async fn test_quiet_sweep_logs_nothing() {
    let (mut engine, _controller, events) = started(test_config()).await;
    engine.run_cycle().await;
    drain(&events);

    engine.run_cycle().await;
    assert!(drain(&events).is_empty());
}

#[tokio::test]
async fn test_monitored_updates_only_on_change() {
    let (mut engine, controller, events) = started(test_config()).await;
    engine.add_monitored(300);
    controller.set_value(300, 4);
    engine.run_cycle().await;
    // refresh (no cached value yet) and the first read both report
    assert_eq!(updates(&drain(&events)), vec![(300, 4), (300, 4)]);

    engine.run_cycle().await;
    assert!(updates(&drain(&events)).is_empty());

    controller.set_value(300, 5);
    engine.run_cycle().await;
    assert_eq!(updates(&drain(&events)), vec![(300, 5)]);
}

#[tokio::test]
async fn test_failed_first_read_is_not_retried() {
    let (mut engine, controller, events) = started(test_config()).await;
    controller.fail_reads_at(300);
    engine.add_monitored(300);
    engine.run_cycle().await;

    assert!(engine.pending().is_empty());
    assert!(engine.monitored().contains(&300));
    let seen = drain(&events);
    assert!(updates(&seen).is_empty());
    assert!(messages(&seen)
        .iter()
        .any(|l| l.contains("Read of register 300")));
}

#[tokio::test]
async fn test_remove_monitored_drops_cached_value() {
    let (mut engine, controller, events) = started(test_config()).await;
    controller.set_value(300, 8);
    engine.add_monitored(300);
    engine.run_cycle().await;
    assert_eq!(engine.cached(300), Some(8));

    engine.handle_command(MonitorCommand::RemoveMonitored(300)).await;
    assert_eq!(engine.cached(300), None);
    assert!(!engine.monitored().contains(&300));
    assert!(messages(&drain(&events)).contains(&"Register 300 monitoring stopped".to_string()));
}

#[tokio::test]
async fn test_poll_once_logs_every_swept_value() {
    let (mut engine, controller, events) = started(test_config()).await;
    engine.add_monitored(253);
    engine.run_cycle().await;
    drain(&events);
    controller.set_value(253, 9);

    engine.handle_command(MonitorCommand::PollOnce).await;

    let seen = drain(&events);
    let lines = messages(&seen);
    assert_eq!(lines.len(), 128);
    assert!(lines.contains(&"Register 128: 0".to_string()));
    assert!(lines.contains(&"Register 253: 9".to_string()));
    assert_eq!(updates(&seen), vec![(253, 9)]);
}

#[tokio::test]
async fn test_range_read_error_skips_only_that_range() {
    let (mut engine, controller, events) = started(test_config()).await;
    controller.fail_reads_at(200);
    controller.set_value(254, 1);
    engine.run_cycle().await;

    let lines = messages(&drain(&events));
    assert!(lines.iter().any(|l| l.starts_with("Range read error (128-252)")));
    assert!(lines.contains(&"Register 254: 1".to_string()));
    assert_eq!(engine.cached(130), None);
}

#[tokio::test]
async fn test_sweep_timeout_keeps_only_complete_ranges() {
    let config = MonitorConfig {
        sweep_timeout_ms: 250,
        ..test_config()
    };
    let (mut engine, controller, events) = started(config).await;
    controller.set_value(130, 1);
    controller.set_value(254, 1);
    controller.set_read_latency(Some(Duration::from_millis(150)));

    engine.run_cycle().await;

    assert_eq!(engine.cached(130), Some(1));
    assert_eq!(engine.cached(254), None);
    let lines = messages(&drain(&events));
    assert!(lines.contains(&"Register 130: 1".to_string()));
    assert!(!lines.iter().any(|l| l.starts_with("Register 254")));
}

#[tokio::test]
async fn test_heartbeat_preserves_reserved_bits() {
    let (mut engine, controller, _events) = started(test_config()).await;
    controller.set_value(128, 0xABC7);

    engine.handle_command(MonitorCommand::SetHeartbeat(true)).await;
    engine.beat_if_due().await;
    assert_eq!(controller.value(128), 0xABC1);
    assert_eq!(engine.heartbeat().counter(), 2);

    // Next beat is scheduled one interval out.
    engine.beat_if_due().await;
    assert_eq!(controller.value(128), 0xABC1);

    engine.handle_command(MonitorCommand::SetHeartbeat(false)).await;
    assert_eq!(engine.heartbeat().next_due(), None);
}

#[tokio::test]
async fn test_heartbeat_failure_backs_off() {
    let (mut engine, controller, events) = started(test_config()).await;
    controller.fail_writes_at(128);

    engine.set_heartbeat(true);
    engine.beat_if_due().await;

    assert!(engine.heartbeat().is_active());
    let due = engine.heartbeat().next_due().unwrap();
    assert!(due > tokio::time::Instant::now() + Duration::from_millis(700));
    assert!(messages(&drain(&events))
        .iter()
        .any(|l| l.starts_with("Heartbeat error")));
}

#[tokio::test]
async fn test_heartbeat_read_failure_counts_as_zero() {
    let mut config = test_config();
    config.heartbeat.interval_ms = 20;
    let (mut engine, controller, events) = started(config).await;
    controller.set_value(128, 0xABC7);
    controller.fail_reads_at(128);

    engine.set_heartbeat(true);
    engine.beat_if_due().await;
    assert_eq!(controller.value(128), 0x0001);
    assert!(!messages(&drain(&events))
        .iter()
        .any(|l| l.starts_with("Heartbeat error")));

    controller.clear_failures();
    controller.set_value(128, 0xABC0);
    tokio::time::sleep(Duration::from_millis(40)).await;
    engine.beat_if_due().await;
    assert_eq!(controller.value(128), 0xABC2);
}

fn wait_for_update(handle: &MonitorHandle, address: u16, value: u16) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        let event = handle
            .events()
            .recv_timeout(remaining)
            .expect("timed out waiting for register update");
        if event == (MonitorEvent::RegisterUpdated { address, value }) {
            return;
        }
    }
}

#[test]
fn test_handle_drives_worker_thread() {
    let controller = SimulatedRegisterClient::new();
    controller.set_value(202, 11);
    let config = MonitorConfig {
        initial_monitored: vec![202],
        poll_interval_ms: 50,
        ..MonitorConfig::default()
    };

    let mut handle = MonitorHandle::spawn(config, Box::new(controller.clone())).unwrap();
    wait_for_update(&handle, 202, 11);

    handle.write_register(202, 12);
    wait_for_update(&handle, 202, 12);
    assert_eq!(controller.value(202), 12);

    handle.stop();
    let rest: Vec<_> = handle.events().try_iter().collect();
    assert_eq!(rest.last(), Some(&MonitorEvent::Stopped));
    assert!(!controller.is_connected());
}

#[test]
fn test_worker_beats_between_poll_cycles() {
    let controller = SimulatedRegisterClient::new();
    controller.set_value(128, 0xABC0);
    let mut config = MonitorConfig {
        initial_monitored: vec![202],
        poll_interval_ms: 50,
        ..MonitorConfig::default()
    };
    config.heartbeat.interval_ms = 20;

    let mut handle = MonitorHandle::spawn(config, Box::new(controller.clone())).unwrap();
    handle.set_heartbeat(true);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut counters = BTreeSet::new();
    while counters.len() < 4 && std::time::Instant::now() < deadline {
        counters.insert(controller.value(128) & 0x000F);
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(counters.len() >= 4, "counter only took values {counters:?}");
    assert_eq!(controller.value(128) & 0xFFF0, 0xABC0);

    // Polling keeps running alongside the beats.
    controller.set_value(202, 7);
    wait_for_update(&handle, 202, 7);

    handle.stop();
    assert!(!controller.is_connected());
}
