use crate::prelude::*;
use crate::config::DeviceKind;

use serde::{Deserialize, Serialize};

// wire format {{{
#[derive(Debug, Default, Deserialize)]
struct RawReport {
    sn: Option<String>,
    product: Option<String>,
    properties: Option<RawProperties>,
    #[serde(rename = "packData", default)]
    pack_data: Vec<RawPack>,

    // meter
    total_power: Option<f64>,
    a_aprt_power: Option<f64>,
    b_aprt_power: Option<f64>,
    c_aprt_power: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProperties {
    grid_input_power: Option<f64>,
    output_home_power: Option<f64>,
    electric_level: Option<f64>,
    min_soc: Option<f64>,
    hyper_tmp: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPack {
    max_temp: Option<f64>,
} // }}}

/// One status snapshot from a battery appliance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp_ms: i64,
    pub serial: Option<String>,
    pub grid_input_power: f64,
    pub output_home_power: f64,
    pub electric_level: f64,
    /// Percent, already scaled down from the wire's tenths.
    pub min_soc: f64,
    pub temperature_raw: Option<f64>,
    pub pack_temperature: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeterReading {
    pub timestamp_ms: i64,
    pub serial: Option<String>,
    pub total_power: f64,
    pub phase_power: [Option<f64>; 3],
}

#[derive(Clone, Debug, PartialEq)]
pub enum Report {
    Battery(Reading),
    Meter(MeterReading),
}

impl Report {
    pub fn serial(&self) -> Option<&str> {
        match self {
            Report::Battery(r) => r.serial.as_deref(),
            Report::Meter(r) => r.serial.as_deref(),
        }
    }

    /// Parses a `/properties/report` body for the given device class.
    /// Required fields that are absent are an error, never a silent zero.
    pub fn parse(body: &str, kind: DeviceKind, timestamp_ms: i64) -> Result<Self, TransportError> {
        let raw: RawReport = serde_json::from_str(body)
            .map_err(|e| TransportError::MalformedBody(e.to_string()))?;

        match kind {
            DeviceKind::Battery => Self::battery(raw, timestamp_ms),
            DeviceKind::Meter => Self::meter(raw, timestamp_ms),
        }
    }

    fn battery(raw: RawReport, timestamp_ms: i64) -> Result<Self, TransportError> {
        let props = raw.properties.ok_or_else(|| missing("properties"))?;

        let pack_temperature = if raw.pack_data.is_empty() {
            None
        } else {
            let sum: f64 = raw.pack_data.iter().filter_map(|p| p.max_temp).sum();
            Some(sum / raw.pack_data.len() as f64 / 100.0)
        };

        Ok(Report::Battery(Reading {
            timestamp_ms,
            serial: raw.sn,
            grid_input_power: props.grid_input_power.ok_or_else(|| missing("gridInputPower"))?,
            output_home_power: props.output_home_power.ok_or_else(|| missing("outputHomePower"))?,
            electric_level: props.electric_level.ok_or_else(|| missing("electricLevel"))?,
            min_soc: props.min_soc.unwrap_or(0.0) / 10.0,
            temperature_raw: props.hyper_tmp,
            pack_temperature,
        }))
    }

    fn meter(raw: RawReport, timestamp_ms: i64) -> Result<Self, TransportError> {
        Ok(Report::Meter(MeterReading {
            timestamp_ms,
            serial: raw.sn,
            total_power: raw.total_power.ok_or_else(|| missing("total_power"))?,
            phase_power: [raw.a_aprt_power, raw.b_aprt_power, raw.c_aprt_power],
        }))
    }
}

fn missing(field: &str) -> TransportError {
    TransportError::MalformedBody(format!("missing required field {}", field))
}

/// Identity of whatever answers at an address, used when pairing by hand.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub product: Option<String>,
    pub serial: Option<String>,
}

impl DeviceInfo {
    pub fn parse(body: &str) -> Result<Self, TransportError> {
        let raw: RawReport = serde_json::from_str(body)
            .map_err(|e| TransportError::MalformedBody(e.to_string()))?;
        Ok(Self {
            product: raw.product,
            serial: raw.sn,
        })
    }

    pub fn suggested_id(&self) -> String {
        format!(
            "Zendure-{}-{}",
            self.product.as_deref().unwrap_or("unknown"),
            self.serial.as_deref().unwrap_or("unknown")
        )
    }
}
