//! Xiaomi (lumi) gateway profile.
//!
//! Read-only sensor family bridged as `xiaomi/{sid}/report`. Values
//! arrive in centi-units (2150 means 21.50 C), scaled down on the way
//! in. No downlink commands.

use crate::profile::AdapterProfile;

const PROFILE: &str = r#"
name = "xiaomi"
priority = 80

[[uplink]]
topic = "xiaomi/{sid}/report"
schema = "telemetry.climate/1.0"
device_id = "{sid}"
when = [{ present = { path = "temperature" } }]

[[uplink.fields]]
from = "temperature"
to = "temperature"
transform = { chain = { steps = [{ scale = { factor = 0.01 } }, { round = { decimals = 2 } }] } }

[[uplink.fields]]
from = "humidity"
to = "humidity"
transform = { chain = { steps = [{ scale = { factor = 0.01 } }, { round = { decimals = 2 } }] } }

[[uplink]]
topic = "xiaomi/{sid}/report"
schema = "evt.motion/1.0"
device_id = "{sid}"
when = [{ equals = { path = "status", value = "motion" } }]
static_fields = { motion = true }

[[uplink]]
topic = "xiaomi/{sid}/report"
schema = "attr/1.0"
device_id = "{sid}"
when = [{ present = { path = "battery" } }]

[[uplink.fields]]
from = "battery"
to = "battery_percent"

[[uplink.fields]]
from = "model"
to = "model"
"#;

pub fn profile() -> AdapterProfile {
    AdapterProfile::from_toml_str(PROFILE).expect("built-in xiaomi profile is valid")
}
