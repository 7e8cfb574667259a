//! Tasmota profile.
//!
//! Vendor layout `tasmota/{device}/...` with the stock SENSOR/STATE
//! telemetry and the `cmnd` command topics. The SENSOR topic is shared
//! by several sensor kinds; payload conditions pick the sub-profile
//! (energy monitor vs climate sensor), and a Dimmer field marks a
//! dimmer rather than a plain switch on STATE.

use crate::profile::AdapterProfile;

const PROFILE: &str = r#"
name = "tasmota"
priority = 90
device_match = "^(plug|strip|sonoff|tasmota)"

# ── Uplinks ──

[[uplink]]
topic = "tasmota/{device}/SENSOR"
schema = "telemetry.power/1.0"
device_id = "{device}"
when = [{ present = { path = "ENERGY" } }]

[[uplink.fields]]
from = "ENERGY.Voltage"
to = "voltage"

[[uplink.fields]]
from = "ENERGY.Current"
to = "current"

[[uplink.fields]]
from = "ENERGY.Power"
to = "power"

[[uplink]]
topic = "tasmota/{device}/SENSOR"
schema = "telemetry.climate/1.0"
device_id = "{device}"
when = [{ present = { path = "SI7021" } }]

[[uplink.fields]]
from = "SI7021.Temperature"
to = "temperature"

[[uplink.fields]]
from = "SI7021.Humidity"
to = "humidity"

[[uplink]]
topic = "tasmota/{device}/STATE"
schema = "state/1.0"
device_id = "{device}"
static_fields = { health = "ok" }
when = [{ present = { path = "Dimmer" } }]

[[uplink.fields]]
from = "POWER"
to = "power_state"
transform = { value_map = { pairs = [{ from = "ON", to = "on" }, { from = "OFF", to = "off" }] } }

[[uplink.fields]]
from = "Dimmer"
to = "brightness"

[[uplink]]
topic = "tasmota/{device}/STATE"
schema = "state/1.0"
device_id = "{device}"
static_fields = { health = "ok" }

[[uplink.fields]]
from = "POWER"
to = "power_state"
required = true
transform = { value_map = { pairs = [{ from = "ON", to = "on" }, { from = "OFF", to = "off" }] } }

[[uplink]]
topic = "tasmota/{device}/RESULT"
schema = "cmd.result/1.0"
device_id = "{device}"
passthrough = true

# ── Downlinks ──

[[downlink]]
command = "turn_on"
topic = "tasmota/{device_id}/cmnd/POWER"
payload = "ON"

[[downlink]]
command = "turn_off"
topic = "tasmota/{device_id}/cmnd/POWER"
payload = "OFF"

[[downlink]]
command = "set_brightness"
topic = "tasmota/{device_id}/cmnd/Dimmer"
payload = "{level}"

[[downlink.args]]
name = "level"
from = "payload.brightness"
"#;

pub fn profile() -> AdapterProfile {
    AdapterProfile::from_toml_str(PROFILE).expect("built-in tasmota profile is valid")
}
