use crate::prelude::*;
use crate::store::{DeviceStore, KEY_CHARGE_METER, KEY_DISCHARGE_METER};

use serde::Serialize;

/// Intervals this long or longer (network outage, host suspend) are not
/// integrated.
pub const MAX_INTERVAL_MS: i64 = 60_000;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Running charged/discharged totals plus the sample they were last
/// advanced to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EnergyState {
    pub charged_kwh: f64,
    pub discharged_kwh: f64,
    pub last_sample_ms: Option<i64>,
    pub last_net_power_w: f64,
}

/// What one sample did to the totals.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Step {
    /// No previous sample to integrate against.
    First,
    /// Interval too long (or running backwards); skipped.
    Gap,
    Charged(f64),
    Discharged(f64),
}

impl EnergyState {
    pub fn new(charged_kwh: f64, discharged_kwh: f64) -> Self {
        Self {
            charged_kwh: charged_kwh.max(0.0),
            discharged_kwh: discharged_kwh.max(0.0),
            ..Default::default()
        }
    }

    /// Advances to the sample (`now_ms`, `net_power_w`) using the trapezoidal
    /// rule over the interval since the previous one.
    pub fn advance(&mut self, net_power_w: f64, now_ms: i64) -> Step {
        let previous = self.last_sample_ms.replace(now_ms);
        let last_power = std::mem::replace(&mut self.last_net_power_w, net_power_w);

        let Some(previous) = previous else {
            return Step::First;
        };

        let delta_ms = now_ms - previous;
        if !(0..MAX_INTERVAL_MS).contains(&delta_ms) {
            return Step::Gap;
        }

        let avg_power_w = (net_power_w + last_power) / 2.0;
        let kwh = avg_power_w.abs() / 1000.0 * delta_ms as f64 / MS_PER_HOUR;

        if avg_power_w >= 0.0 {
            self.charged_kwh += kwh;
            Step::Charged(kwh)
        } else {
            self.discharged_kwh += kwh;
            Step::Discharged(kwh)
        }
    }

    /// Lifetime discharged/charged ratio in percent, one decimal; 100 until
    /// anything has been charged.
    pub fn efficiency(&self) -> f64 {
        if self.charged_kwh > 0.0 {
            (self.discharged_kwh / self.charged_kwh * 1000.0).round() / 10.0
        } else {
            100.0
        }
    }

    pub fn reset(&mut self) {
        self.charged_kwh = 0.0;
        self.discharged_kwh = 0.0;
    }
}

/// Functional form of [`EnergyState::advance`]: the state after the sample
/// and the efficiency derived from it.
pub fn integrate(state: EnergyState, net_power_w: f64, now_ms: i64) -> (EnergyState, f64) {
    let mut next = state;
    next.advance(net_power_w, now_ms);
    let efficiency = next.efficiency();
    (next, efficiency)
}

/// An [`EnergyState`] whose totals are written through to the store.
///
/// Store failures are logged and otherwise ignored: the in-memory totals
/// still move on and get published, a crash then loses at most the samples
/// since the last good write.
pub struct EnergyMeter {
    state: EnergyState,
    store: DeviceStore,
    device_id: String,
}

impl EnergyMeter {
    /// Loads persisted totals, starting from zero where there are none.
    pub async fn load(device_id: &str, store: DeviceStore) -> Self {
        let charged = Self::load_total(device_id, &store, KEY_CHARGE_METER).await;
        let discharged = Self::load_total(device_id, &store, KEY_DISCHARGE_METER).await;
        info!(
            "device {}: loaded meters charged={:.3}kWh discharged={:.3}kWh",
            device_id, charged, discharged
        );

        Self {
            state: EnergyState::new(charged, discharged),
            store,
            device_id: device_id.to_string(),
        }
    }

    async fn load_total(device_id: &str, store: &DeviceStore, key: &str) -> f64 {
        match store.get_f64(key).await {
            Ok(value) => value.unwrap_or(0.0),
            Err(e) => {
                error!("device {}: failed to load {}: {}", device_id, key, e);
                0.0
            }
        }
    }

    pub fn state(&self) -> &EnergyState {
        &self.state
    }

    pub async fn record(&mut self, net_power_w: f64, now_ms: i64) -> Step {
        let step = self.state.advance(net_power_w, now_ms);

        match step {
            Step::Charged(kwh) => {
                trace!("device {}: +{:.6}kWh charged", self.device_id, kwh);
                self.persist(KEY_CHARGE_METER, self.state.charged_kwh).await;
            }
            Step::Discharged(kwh) => {
                trace!("device {}: +{:.6}kWh discharged", self.device_id, kwh);
                self.persist(KEY_DISCHARGE_METER, self.state.discharged_kwh).await;
            }
            Step::Gap => {
                debug!("device {}: sample gap, interval not integrated", self.device_id);
            }
            Step::First => {}
        }

        step
    }

    pub async fn reset(&mut self) {
        info!("device {}: resetting meters", self.device_id);
        self.state.reset();
        self.persist(KEY_CHARGE_METER, 0.0).await;
        self.persist(KEY_DISCHARGE_METER, 0.0).await;
    }

    async fn persist(&self, key: &str, value: f64) {
        if let Err(e) = self.store.set_f64(key, value).await {
            error!("device {}: failed to persist {}: {}", self.device_id, key, e);
        }
    }
}
