use crate::zendure::Reading;

use serde::Serialize;

/// Kelvin offset of `hyperTmp`, in tenths.
const TEMPERATURE_OFFSET: f64 = 2731.0;

/// Per-device correction settings.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Corrections {
    pub minsoc_correction: bool,
    pub output_offset_w: f64,
}

impl Corrections {
    pub fn for_device(device: &crate::config::Device) -> Self {
        Self {
            minsoc_correction: device.minsoc_correction(),
            output_offset_w: device.output_correction_offset(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CorrectedReading {
    /// Positive while charging, negative while feeding the home.
    pub net_power_w: f64,
    pub soc_percent: u8,
    pub temperature_c: Option<f64>,
    pub pack_temperature_c: Option<f64>,
}

pub fn correct(reading: &Reading, corrections: &Corrections) -> CorrectedReading {
    let mut output = reading.output_home_power;
    if output > 0.0 {
        output += corrections.output_offset_w;
    }

    let net_power_w = if reading.grid_input_power != 0.0 {
        reading.grid_input_power
    } else {
        -output
    };

    let soc_percent = if corrections.minsoc_correction {
        rescale_soc(reading.electric_level, reading.min_soc)
    } else {
        clamp_percent(reading.electric_level)
    };

    CorrectedReading {
        net_power_w,
        soc_percent,
        temperature_c: reading.temperature_raw.map(|raw| (raw - TEMPERATURE_OFFSET) / 10.0),
        pack_temperature_c: reading.pack_temperature,
    }
}

/// Maps the raw `min_soc..100` range onto `0..100`.
fn rescale_soc(level: f64, min_soc: f64) -> u8 {
    // a floor of 100% leaves no usable range to scale into
    if min_soc >= 100.0 {
        return clamp_percent(level);
    }
    clamp_percent(((level - min_soc) / (100.0 - min_soc) * 100.0).round())
}

fn clamp_percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}
