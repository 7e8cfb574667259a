//! Declarative value-transform library.
//!
//! Profiles reference these by name from configuration; there is
//! deliberately no scripting escape hatch. Each transform takes one
//! JSON value and produces one JSON value or a typed error.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::TransformError;

/// A single declarative value transform.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTransform {
    /// `v * factor + offset`.
    Scale {
        factor: f64,
        #[serde(default)]
        offset: f64,
    },
    /// Linear remap between ranges, clamped to the target range.
    /// `[0,255] -> [0,100]` style; integral results stay integers.
    RangeRemap { from: [f64; 2], to: [f64; 2] },
    FahrenheitToCelsius,
    CelsiusToFahrenheit,
    /// Substitution table; input must equal one of the `from` values.
    ValueMap {
        pairs: Vec<MapPair>,
        #[serde(default)]
        fallback: Option<Value>,
    },
    /// `[r,g,b]` array to `#rrggbb`.
    RgbToHex,
    /// `#rrggbb` string to `[r,g,b]`.
    HexToRgb,
    /// Round a number to `decimals` places.
    Round {
        #[serde(default)]
        decimals: u32,
    },
    /// Replace whatever arrives with a constant.
    Constant { value: Value },
    /// Stringify scalars (numbers, booleans).
    ToString,
    /// Regex find-and-replace over a string.
    RegexReplace {
        regex: crate::condition::RegexField,
        replace: String,
    },
    /// Apply several transforms in order.
    Chain { steps: Vec<ValueTransform> },
}

/// One substitution pair for [`ValueTransform::ValueMap`].
#[derive(Debug, Clone, Deserialize)]
pub struct MapPair {
    pub from: Value,
    pub to: Value,
}

/// Wrap an f64 result, collapsing integral values to JSON integers.
fn number(v: f64) -> Result<Value, TransformError> {
    if !v.is_finite() {
        return Err(TransformError::validation(format!(
            "non-finite numeric result: {v}"
        )));
    }
    if (v - v.round()).abs() < 1e-9 && v.abs() < i64::MAX as f64 {
        Ok(json!(v.round() as i64))
    } else {
        Ok(json!(v))
    }
}

fn expect_f64(value: &Value) -> Result<f64, TransformError> {
    value
        .as_f64()
        .ok_or_else(|| TransformError::type_mismatch(format!("expected number, got {value}")))
}

impl ValueTransform {
    /// Apply the transform to one value.
    pub fn apply(&self, value: &Value) -> Result<Value, TransformError> {
        match self {
            Self::Scale { factor, offset } => number(expect_f64(value)? * factor + offset),

            Self::RangeRemap { from, to } => {
                let v = expect_f64(value)?;
                let (f0, f1) = (from[0], from[1]);
                let (t0, t1) = (to[0], to[1]);
                if (f1 - f0).abs() < f64::EPSILON {
                    return Err(TransformError::validation("degenerate source range"));
                }
                let scaled = t0 + (v - f0) * (t1 - t0) / (f1 - f0);
                number(scaled.clamp(t0.min(t1), t0.max(t1)))
            }

            Self::FahrenheitToCelsius => {
                let f = expect_f64(value)?;
                number(((f - 32.0) * 5.0 / 9.0 * 100.0).round() / 100.0)
            }

            Self::CelsiusToFahrenheit => {
                let c = expect_f64(value)?;
                number(((c * 9.0 / 5.0 + 32.0) * 100.0).round() / 100.0)
            }

            Self::ValueMap { pairs, fallback } => {
                for pair in pairs {
                    if &pair.from == value {
                        return Ok(pair.to.clone());
                    }
                }
                match fallback {
                    Some(fallback) => Ok(fallback.clone()),
                    None => Err(TransformError::validation(format!(
                        "value {value} not in substitution table"
                    ))),
                }
            }

            Self::RgbToHex => {
                let parts = value.as_array().ok_or_else(|| {
                    TransformError::type_mismatch(format!("expected [r,g,b], got {value}"))
                })?;
                if parts.len() != 3 {
                    return Err(TransformError::validation(format!(
                        "expected 3 rgb components, got {}",
                        parts.len()
                    )));
                }
                let mut channels = [0u8; 3];
                for (i, part) in parts.iter().enumerate() {
                    let v = expect_f64(part)?;
                    if !(0.0..=255.0).contains(&v) {
                        return Err(TransformError::validation(format!(
                            "rgb component out of range: {v}"
                        )));
                    }
                    channels[i] = v.round() as u8;
                }
                Ok(json!(format!(
                    "#{:02x}{:02x}{:02x}",
                    channels[0], channels[1], channels[2]
                )))
            }

            Self::HexToRgb => {
                let s = value.as_str().ok_or_else(|| {
                    TransformError::type_mismatch(format!("expected hex string, got {value}"))
                })?;
                let hex = s.strip_prefix('#').unwrap_or(s);
                if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(TransformError::validation(format!("bad hex color '{s}'")));
                }
                let r = u8::from_str_radix(&hex[0..2], 16).unwrap();
                let g = u8::from_str_radix(&hex[2..4], 16).unwrap();
                let b = u8::from_str_radix(&hex[4..6], 16).unwrap();
                Ok(json!([r, g, b]))
            }

            Self::Round { decimals } => {
                let v = expect_f64(value)?;
                let scale = 10f64.powi(*decimals as i32);
                number((v * scale).round() / scale)
            }

            Self::Constant { value } => Ok(value.clone()),

            Self::ToString => match value {
                Value::String(s) => Ok(json!(s)),
                Value::Number(n) => Ok(json!(n.to_string())),
                Value::Bool(b) => Ok(json!(b.to_string())),
                other => Err(TransformError::type_mismatch(format!(
                    "cannot stringify {other}"
                ))),
            },

            Self::RegexReplace { regex, replace } => {
                let s = value.as_str().ok_or_else(|| {
                    TransformError::type_mismatch(format!("expected string, got {value}"))
                })?;
                Ok(json!(regex.0.replace_all(s, replace.as_str()).into_owned()))
            }

            Self::Chain { steps } => {
                let mut current = value.clone();
                for step in steps {
                    current = step.apply(&current)?;
                }
                Ok(current)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_applies_factor_and_offset() {
        let t = ValueTransform::Scale {
            factor: 0.1,
            offset: 2.0,
        };
        assert_eq!(t.apply(&json!(230)).unwrap(), json!(25.0));
    }

    #[test]
    fn brightness_remap_is_exact_at_bounds() {
        let t = ValueTransform::RangeRemap {
            from: [0.0, 255.0],
            to: [0.0, 100.0],
        };
        assert_eq!(t.apply(&json!(255)).unwrap(), json!(100));
        assert_eq!(t.apply(&json!(0)).unwrap(), json!(0));
        // Out-of-range input clamps to the target range.
        assert_eq!(t.apply(&json!(300)).unwrap(), json!(100));
    }

    #[test]
    fn remap_midpoint_stays_float() {
        let t = ValueTransform::RangeRemap {
            from: [0.0, 255.0],
            to: [0.0, 100.0],
        };
        let v = t.apply(&json!(128)).unwrap();
        let f = v.as_f64().unwrap();
        assert!((f - 50.196).abs() < 0.01);
    }

    #[test]
    fn fahrenheit_to_celsius() {
        let t = ValueTransform::FahrenheitToCelsius;
        assert_eq!(t.apply(&json!(32)).unwrap(), json!(0));
        assert_eq!(t.apply(&json!(212)).unwrap(), json!(100));
        assert_eq!(t.apply(&json!(98.6)).unwrap(), json!(37.0));
    }

    #[test]
    fn value_map_substitutes() {
        let t = ValueTransform::ValueMap {
            pairs: vec![
                MapPair {
                    from: json!("ON"),
                    to: json!("on"),
                },
                MapPair {
                    from: json!("OFF"),
                    to: json!("off"),
                },
            ],
            fallback: None,
        };
        assert_eq!(t.apply(&json!("ON")).unwrap(), json!("on"));
        assert!(t.apply(&json!("TOGGLE")).is_err());
    }

    #[test]
    fn value_map_fallback() {
        let t = ValueTransform::ValueMap {
            pairs: vec![MapPair {
                from: json!(1),
                to: json!(true),
            }],
            fallback: Some(json!(false)),
        };
        assert_eq!(t.apply(&json!(99)).unwrap(), json!(false));
    }

    #[test]
    fn rgb_hex_roundtrip() {
        let to_hex = ValueTransform::RgbToHex;
        let to_rgb = ValueTransform::HexToRgb;
        let hex = to_hex.apply(&json!([255, 0, 128])).unwrap();
        assert_eq!(hex, json!("#ff0080"));
        assert_eq!(to_rgb.apply(&hex).unwrap(), json!([255, 0, 128]));
    }

    #[test]
    fn rgb_rejects_bad_input() {
        let t = ValueTransform::RgbToHex;
        assert!(t.apply(&json!([255, 0])).is_err());
        assert!(t.apply(&json!([256, 0, 0])).is_err());
        assert!(t.apply(&json!("red")).is_err());
    }

    #[test]
    fn chain_applies_in_order() {
        let t = ValueTransform::Chain {
            steps: vec![
                ValueTransform::Scale {
                    factor: 2.0,
                    offset: 0.0,
                },
                ValueTransform::Round { decimals: 0 },
            ],
        };
        assert_eq!(t.apply(&json!(10.3)).unwrap(), json!(21));
    }

    #[test]
    fn type_mismatch_on_non_number() {
        let t = ValueTransform::Scale {
            factor: 1.0,
            offset: 0.0,
        };
        let err = t.apply(&json!("abc")).unwrap_err();
        assert_eq!(err.kind, crate::error::TransformErrorKind::TypeMismatch);
    }

    #[test]
    fn regex_replace_strips_suffix() {
        let t = ValueTransform::RegexReplace {
            regex: crate::condition::RegexField::try_from("_light$".to_string()).unwrap(),
            replace: String::new(),
        };
        assert_eq!(
            t.apply(&json!("living_room_light")).unwrap(),
            json!("living_room")
        );
        assert!(t.apply(&json!(7)).is_err());
    }

    #[test]
    fn deserializes_from_toml_fragment() {
        #[derive(Deserialize)]
        struct Holder {
            transform: ValueTransform,
        }
        let holder: Holder = toml::from_str(
            r#"
transform = { range_remap = { from = [0, 255], to = [0, 100] } }
"#,
        )
        .unwrap();
        assert_eq!(holder.transform.apply(&json!(255)).unwrap(), json!(100));

        let holder: Holder = toml::from_str(r#"transform = "fahrenheit_to_celsius""#).unwrap();
        assert_eq!(holder.transform.apply(&json!(32)).unwrap(), json!(0));
    }
}
