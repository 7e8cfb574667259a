//! Zigbee2MQTT profile.
//!
//! Flat `zigbee2mqtt/{device}` state topics, JSON availability, and
//! the `/set` command convention. Brightness uses the Zigbee 0..254
//! range. Lowest built-in priority: it shares device naming with no
//! other vendor, so it acts as the fallback claimant for commands.

use crate::profile::AdapterProfile;

const PROFILE: &str = r#"
name = "zigbee"
priority = 70

# ── Uplinks ──

[[uplink]]
topic = "zigbee2mqtt/{device}"
schema = "state/1.0"
device_id = "{device}"
static_fields = { health = "ok" }
when = [{ present = { path = "state" } }]

[[uplink.fields]]
from = "state"
to = "power_state"
transform = { value_map = { pairs = [{ from = "ON", to = "on" }, { from = "OFF", to = "off" }] } }

[[uplink.fields]]
from = "brightness"
to = "brightness"
transform = { range_remap = { from = [0, 254], to = [0, 100] } }

[[uplink.fields]]
from = "linkquality"
to = "link_quality"

[[uplink]]
topic = "zigbee2mqtt/{device}"
schema = "telemetry.climate/1.0"
device_id = "{device}"
when = [
    { present = { path = "temperature" } },
    { absent = { path = "state" } },
]

[[uplink.fields]]
from = "temperature"
to = "temperature"

[[uplink.fields]]
from = "humidity"
to = "humidity"

[[uplink.fields]]
from = "battery"
to = "battery_percent"

[[uplink]]
topic = "zigbee2mqtt/{device}/availability"
schema = "lwt/1.0"
device_id = "{device}"

[[uplink.fields]]
from = "state"
to = "status"
required = true

# ── Downlinks ──

[[downlink]]
command = "turn_on"
topic = "zigbee2mqtt/{device_id}/set"
payload = { state = "ON" }

[[downlink]]
command = "turn_off"
topic = "zigbee2mqtt/{device_id}/set"
payload = { state = "OFF" }

[[downlink]]
command = "set_brightness"
topic = "zigbee2mqtt/{device_id}/set"
payload = { brightness = "{level}" }

[[downlink.args]]
name = "level"
from = "payload.brightness"
transform = { range_remap = { from = [0, 100], to = [0, 254] } }

[[downlink]]
command = "set_color"
topic = "zigbee2mqtt/{device_id}/set"
payload = { color = { hex = "{hex}" } }

[[downlink.args]]
name = "hex"
from = "payload.rgb"
transform = "rgb_to_hex"
"#;

pub fn profile() -> AdapterProfile {
    AdapterProfile::from_toml_str(PROFILE).expect("built-in zigbee profile is valid")
}
