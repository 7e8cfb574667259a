//! Home Assistant MQTT profile.
//!
//! Covers the statestream-style layout `homeassistant/{class}/{name}/...`
//! for lights, switches, and attribute dumps. Canonical device ids
//! append the class (`living_room` light becomes `living_room_light`),
//! which the downlink rules reverse with a regex strip.

use crate::profile::AdapterProfile;

const PROFILE: &str = r#"
name = "homeassistant"
priority = 100
device_match = "_(light|switch)$"

# ── Uplinks ──

[[uplink]]
topic = "homeassistant/light/{name}/state"
schema = "state/1.0"
device_id = "{name}_light"
static_fields = { health = "ok" }

[[uplink.fields]]
from = "state"
to = "power_state"
required = true

[[uplink.fields]]
from = "brightness"
to = "brightness"
transform = { range_remap = { from = [0, 255], to = [0, 100] } }

[[uplink.fields]]
from = "color_temp"
to = "color_temp"

[[uplink]]
topic = "homeassistant/switch/{name}/state"
schema = "state/1.0"
device_id = "{name}_switch"
static_fields = { health = "ok" }

[[uplink.fields]]
from = "state"
to = "power_state"
required = true

[[uplink]]
topic = "homeassistant/{class}/{name}/attributes"
schema = "attr/1.0"
device_id = "{name}_{class}"
passthrough = true

# ── Downlinks ──

[[downlink]]
command = "turn_on"
topic = "homeassistant/light/{name}/set"
payload = { state = "ON" }
when = [{ matches = { path = "device_id", regex = "_light$" } }]

[[downlink.args]]
name = "name"
from = "device_id"
transform = { regex_replace = { regex = "_light$", replace = "" } }

[[downlink]]
command = "turn_off"
topic = "homeassistant/light/{name}/set"
payload = { state = "OFF" }
when = [{ matches = { path = "device_id", regex = "_light$" } }]

[[downlink.args]]
name = "name"
from = "device_id"
transform = { regex_replace = { regex = "_light$", replace = "" } }

[[downlink]]
command = "set_brightness"
topic = "homeassistant/light/{name}/set"
payload = { state = "ON", brightness = "{level}" }
when = [{ matches = { path = "device_id", regex = "_light$" } }]

[[downlink.args]]
name = "name"
from = "device_id"
transform = { regex_replace = { regex = "_light$", replace = "" } }

[[downlink.args]]
name = "level"
from = "payload.brightness"
transform = { range_remap = { from = [0, 100], to = [0, 255] } }

[[downlink]]
command = "turn_on"
topic = "homeassistant/switch/{name}/set"
payload = "ON"
when = [{ matches = { path = "device_id", regex = "_switch$" } }]

[[downlink.args]]
name = "name"
from = "device_id"
transform = { regex_replace = { regex = "_switch$", replace = "" } }

[[downlink]]
command = "turn_off"
topic = "homeassistant/switch/{name}/set"
payload = "OFF"
when = [{ matches = { path = "device_id", regex = "_switch$" } }]

[[downlink.args]]
name = "name"
from = "device_id"
transform = { regex_replace = { regex = "_switch$", replace = "" } }
"#;

pub fn profile() -> AdapterProfile {
    AdapterProfile::from_toml_str(PROFILE).expect("built-in homeassistant profile is valid")
}
