//! E2E tests for the full command lifecycle:
//! RTK request → vendor publish → device ack/result → correlation,
//! including the synthesized failure on timeout.

mod helpers;

use std::time::Duration;

use serde_json::json;

use helpers::TestHarness;
use rtk_gateway::correlator::CommandState;
use rtk_gateway::pipeline::Outcome;

fn turn_on_request(device_id: &str, command_id: &str) -> String {
    json!({
        "schema": "cmd.turn_on/1.0",
        "ts": 1,
        "device_id": device_id,
        "payload": {"command": "turn_on", "command_id": command_id},
    })
    .to_string()
}

/// RTK turn_on for a Tasmota plug publishes the vendor command and
/// records the command as pending (S3).
#[tokio::test]
async fn e2e_rtk_command_to_tasmota() {
    let h = TestHarness::with_builtin_profiles();

    let outcome = h
        .deliver("rtk/v1/home/main/plug01/cmd/req", &turn_on_request("plug01", "c1"))
        .await;
    assert_eq!(outcome, Outcome::Published);

    let published = h.mqtt.publishes();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "tasmota/plug01/cmnd/POWER");
    assert_eq!(published[0].payload, b"ON");
    assert_eq!(published[0].qos, 1);

    let entry = h.correlator.get("c1").unwrap();
    assert_eq!(entry.state, CommandState::Pending);
    assert_eq!(entry.device_topic, "tasmota/plug01/cmnd/POWER");
}

/// With no ack or result, the correlator synthesizes a failed result
/// on the RTK side (S4).
#[tokio::test(start_paused = true)]
async fn e2e_command_timeout_synthesizes_result() {
    let h = TestHarness::with_builtin_profiles();

    let request = json!({
        "schema": "cmd.turn_on/1.0",
        "ts": 1,
        "device_id": "plug01",
        "payload": {"command": "turn_on", "command_id": "c1", "timeout_ms": 500},
    });
    h.deliver("rtk/v1/home/main/plug01/cmd/req", &request.to_string())
        .await;
    h.mqtt.clear();

    tokio::time::advance(Duration::from_millis(600)).await;
    h.correlator.tick(h.mqtt.as_ref()).await;

    let results = h.mqtt.on_topic("rtk/v1/home/main/plug01/cmd/res");
    assert_eq!(results.len(), 1);

    let envelope = h.last_envelope_on("rtk/v1/home/main/plug01/cmd/res");
    assert_eq!(envelope["schema"], "cmd.result/1.0");
    assert_eq!(envelope["payload"]["ok"], false);
    assert_eq!(envelope["payload"]["error"]["kind"], "timeout");
    assert_eq!(envelope["payload"]["command"], "turn_on");
    assert_eq!(envelope["payload"]["command_id"], "c1");

    let entry = h.correlator.get("c1").unwrap();
    assert_eq!(entry.state, CommandState::TimedOut);
}

/// Device result flows back uplink, completes the command, and is
/// republished on the RTK result topic.
#[tokio::test]
async fn e2e_device_result_completes_lifecycle() {
    let h = TestHarness::with_builtin_profiles();

    h.deliver("rtk/v1/home/main/plug01/cmd/req", &turn_on_request("plug01", "c1"))
        .await;

    let outcome = h
        .deliver(
            "tasmota/plug01/RESULT",
            r#"{"command_id":"c1","ok":true,"POWER":"ON"}"#,
        )
        .await;
    assert_eq!(outcome, Outcome::Published);

    let results = h.mqtt.on_topic("rtk/v1/home/main/plug01/cmd/res");
    assert_eq!(results.len(), 1);

    let entry = h.correlator.get("c1").unwrap();
    assert_eq!(entry.state, CommandState::Completed);
    assert_eq!(entry.result.unwrap()["POWER"], "ON");
}

/// Command id, device id, and the command name all survive the round
/// trip from RTK request to vendor topic and back through the device
/// result (the device never echoes the name; the gateway restores it
/// from the tracked request).
#[tokio::test]
async fn e2e_ids_preserved_across_lifecycle() {
    let h = TestHarness::with_builtin_profiles();

    h.deliver("rtk/v1/home/main/plug01/cmd/req", &turn_on_request("plug01", "c42"))
        .await;
    h.deliver(
        "tasmota/plug01/RESULT",
        r#"{"command_id":"c42","ok":true}"#,
    )
    .await;

    let envelope = h.last_envelope_on("rtk/v1/home/main/plug01/cmd/res");
    assert_eq!(envelope["device_id"], "plug01");
    assert_eq!(envelope["payload"]["command"], "turn_on");
    assert_eq!(envelope["payload"]["command_id"], "c42");
    assert_eq!(envelope["trace"]["req_id"], "c42");

    let entry = h.correlator.get("c42").unwrap();
    assert_eq!(entry.device_id, "plug01");
    assert_eq!(entry.command, "turn_on");
}

/// A result for an unknown command id is forwarded transparently but
/// not correlated.
#[tokio::test]
async fn e2e_unknown_result_forwarded_uncorrelated() {
    let h = TestHarness::with_builtin_profiles();

    let outcome = h
        .deliver(
            "tasmota/plug01/RESULT",
            r#"{"command_id":"never-issued","ok":true}"#,
        )
        .await;
    assert_eq!(outcome, Outcome::Published);
    assert_eq!(
        h.mqtt
            .on_topic("rtk/v1/home/main/plug01/cmd/res")
            .len(),
        1
    );
    assert!(h.correlator.get("never-issued").is_none());
    assert_eq!(h.metrics.snapshot().uncorrelated_responses, 1);
}

/// A request without a command id still works; the gateway generates
/// one for correlation.
#[tokio::test]
async fn e2e_missing_command_id_is_generated() {
    let h = TestHarness::with_builtin_profiles();

    let request = json!({
        "schema": "cmd.turn_off/1.0",
        "ts": 1,
        "device_id": "plug01",
        "payload": {"command": "turn_off"},
    });
    let outcome = h
        .deliver("rtk/v1/home/main/plug01/cmd/req", &request.to_string())
        .await;
    assert_eq!(outcome, Outcome::Published);
    assert_eq!(h.correlator.len(), 1);
    assert_eq!(h.correlator.open_len(), 1);
}

/// Commands to an unknown device family drop with no_adapter and no
/// vendor publish.
#[tokio::test]
async fn e2e_command_for_unclaimed_device() {
    let h = TestHarness::with_builtin_profiles();

    // No profile's command table has "levitate".
    let request = json!({
        "schema": "cmd.levitate/1.0",
        "ts": 1,
        "device_id": "plug01",
        "payload": {"command": "levitate", "command_id": "c1"},
    });
    let outcome = h
        .deliver("rtk/v1/home/main/plug01/cmd/req", &request.to_string())
        .await;
    assert_eq!(outcome, Outcome::Dropped("no_adapter".into()));
    assert!(h.mqtt.publishes().is_empty());
    assert!(h.correlator.get("c1").is_none());
}
