//! Sensor value decoding and message rendering.
//! Raw notification payloads are turned into a [`Reading`] by a
//! capability-specific [`Decoder`], then rendered for the message sink.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single malformed sample. The bridge drops the sample and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
}

/// A decoded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// What was measured, e.g. `temperature`
    pub quantity: &'static str,
    pub value: f64,
    /// Unit suffix, e.g. `C`
    pub unit: &'static str,
}

impl Reading {
    /// Value with at most two decimals and no trailing zeros.
    pub fn display_value(&self) -> String {
        let fixed = format!("{:.2}", self.value);
        let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
        if trimmed == "-0" {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

/// Turns raw characteristic values into readings.
pub trait Decoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<Reading, DecodeError>;
}

/// Thingy:52 temperature characteristic: an `int8` integer part followed
/// by a `uint8` hundredths part.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThingyTemperatureDecoder;

impl Decoder for ThingyTemperatureDecoder {
    fn decode(&self, raw: &[u8]) -> Result<Reading, DecodeError> {
        let &[integer, hundredths, ..] = raw else {
            return Err(DecodeError::TooShort {
                expected: 2,
                actual: raw.len(),
            });
        };
        if hundredths > 99 {
            return Err(DecodeError::OutOfRange {
                field: "hundredths",
                value: hundredths as i64,
            });
        }
        let value = integer as i8 as f64 + hundredths as f64 / 100.0;
        Ok(Reading {
            quantity: "temperature",
            value,
            unit: "C",
        })
    }
}

/// How a reading is rendered before publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// `temperature: 21.5C`
    #[default]
    Text,
    /// An InfluxDB style point with `measurement`, `fields` and `tags`.
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageFormatter {
    format: PayloadFormat,
    measurement: String,
    tags: BTreeMap<String, String>,
}

impl MessageFormatter {
    pub fn new(format: PayloadFormat, measurement: impl Into<String>, tags: BTreeMap<String, String>) -> Self {
        Self {
            format,
            measurement: measurement.into(),
            tags,
        }
    }

    pub fn text() -> Self {
        Self::new(PayloadFormat::Text, "", BTreeMap::new())
    }

    pub fn render(&self, reading: &Reading) -> String {
        match self.format {
            PayloadFormat::Text => format!(
                "{}: {}{}",
                reading.quantity,
                reading.display_value(),
                reading.unit
            ),
            PayloadFormat::Json => {
                let mut fields = serde_json::Map::new();
                fields.insert(reading.quantity.to_string(), serde_json::json!(reading.value));
                serde_json::json!({
                    "measurement": self.measurement,
                    "fields": fields,
                    "tags": self.tags,
                })
                .to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_integer_and_hundredths() {
        let reading = ThingyTemperatureDecoder.decode(&[21, 50]).unwrap();
        assert_eq!(reading.value, 21.5);
        assert_eq!(reading.display_value(), "21.5");

        let reading = ThingyTemperatureDecoder.decode(&[22, 25, 0xff]).unwrap();
        assert_eq!(reading.display_value(), "22.25");

        let reading = ThingyTemperatureDecoder.decode(&[19, 0]).unwrap();
        assert_eq!(reading.display_value(), "19");
    }

    #[test]
    fn integer_part_is_signed() {
        let reading = ThingyTemperatureDecoder.decode(&[0xfb, 0]).unwrap();
        assert_eq!(reading.value, -5.0);
        assert_eq!(reading.display_value(), "-5");
    }

    #[test]
    fn short_or_out_of_range_payloads_fail() {
        assert_eq!(
            ThingyTemperatureDecoder.decode(&[21]),
            Err(DecodeError::TooShort {
                expected: 2,
                actual: 1
            })
        );
        assert!(ThingyTemperatureDecoder.decode(&[]).is_err());
        assert_eq!(
            ThingyTemperatureDecoder.decode(&[21, 100]),
            Err(DecodeError::OutOfRange {
                field: "hundredths",
                value: 100
            })
        );
    }

    #[test]
    fn renders_text_message() {
        let reading = ThingyTemperatureDecoder.decode(&[21, 50]).unwrap();
        assert_eq!(MessageFormatter::text().render(&reading), "temperature: 21.5C");
    }

    #[test]
    fn renders_json_point() {
        let mut tags = BTreeMap::new();
        tags.insert("operator".to_string(), "lab".to_string());
        let formatter = MessageFormatter::new(PayloadFormat::Json, "climate", tags);
        let reading = ThingyTemperatureDecoder.decode(&[21, 50]).unwrap();

        let value: serde_json::Value = serde_json::from_str(&formatter.render(&reading)).unwrap();
        assert_eq!(value["measurement"], "climate");
        assert_eq!(value["fields"]["temperature"], 21.5);
        assert_eq!(value["tags"]["operator"], "lab");
    }

    #[test]
    fn payload_format_is_lowercase_in_config() {
        assert_eq!(serde_json::to_string(&PayloadFormat::Json).unwrap(), "\"json\"");
        let text: PayloadFormat = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(text, PayloadFormat::Text);
    }
}
