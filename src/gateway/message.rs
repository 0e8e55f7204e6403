use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::config::ParameterUpdate;

/// One inbound command. Every field is optional; numeric fields also accept numeric strings
/// and floats, and values of the wrong type are ignored rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CommandMessage {
    #[serde(deserialize_with = "lenient_bool")]
    pub start_focus: Option<bool>,
    #[serde(deserialize_with = "lenient_int")]
    pub start_hour: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub start_min: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub focus_hour: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub focus_min: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub exhaustion_level: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub focus_pattern: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub cct_k: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub lux: Option<i64>,
    #[serde(deserialize_with = "lenient_string")]
    pub action: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub go_home: Option<bool>,
}

impl CommandMessage {
    /// Parses a JSON object, or falls back to plain text mentioning `true`/`false`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(raw) {
            let message = Self::from_fields(fields);
            return (!message.is_empty()).then_some(message);
        }

        let lowered = raw.to_lowercase();
        let start_focus = if lowered.contains("true") {
            true
        } else if lowered.contains("false") {
            false
        } else {
            return None;
        };
        Some(Self {
            start_focus: Some(start_focus),
            ..Self::default()
        })
    }

    fn from_fields(fields: Map<String, Value>) -> Self {
        // lenient field deserializers cannot fail, so this only fails on non-objects
        serde_json::from_value(Value::Object(fields)).unwrap_or_default()
    }

    pub fn parameter_update(&self) -> ParameterUpdate {
        ParameterUpdate {
            start_hour: self.start_hour,
            start_min: self.start_min,
            focus_hour: self.focus_hour,
            focus_min: self.focus_min,
            exhaustion_level: self.exhaustion_level,
            focus_pattern: self.focus_pattern,
            cct_k: self.cct_k,
            lux: self.lux,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start_focus.is_none()
            && self.action.is_none()
            && self.go_home != Some(true)
            && self.parameter_update().is_empty()
    }
}

fn lenient_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.trunc() as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(flag) => Some(flag),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    })
}
