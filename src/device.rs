use crate::prelude::*;
use crate::availability::{FailureTracker, Transition};
use crate::config::DeviceKind;
use crate::corrector::{self, CorrectedReading, Corrections};
use crate::endpoint::DeviceEndpoint;
use crate::mqtt::Message;
use crate::energy::{EnergyMeter, EnergyState};
use crate::poll::{InFlight, PollController, PollState};
use crate::store::{DeviceStore, KEY_IP, KEY_SN};
use crate::zendure::{Ack, Client, MeterReading, Properties, Reading, Report};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// What a single poll attempt amounted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Published,
    Failed,
    /// Another poll for this device was still in flight.
    Skipped,
    /// The device was removed while the request was out.
    Discarded,
}

/// Everything published for a battery after a successful poll.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatteryStatus {
    pub power: f64,
    pub battery: u8,
    pub temperature: Option<f64>,
    pub pack_temperature: Option<f64>,
    pub charged: f64,
    pub discharged: f64,
    pub efficiency: f64,
}

impl BatteryStatus {
    fn new(reading: &CorrectedReading, energy: &EnergyState) -> Self {
        Self {
            power: reading.net_power_w,
            battery: reading.soc_percent,
            temperature: reading.temperature_c,
            pack_temperature: reading.pack_temperature_c,
            charged: energy.charged_kwh,
            discharged: energy.discharged_kwh,
            efficiency: energy.efficiency(),
        }
    }
}

struct DeviceState {
    energy: EnergyMeter,
    failures: FailureTracker,
    serial: Option<String>,
    smart_mode_sent: bool,
}

/// One polled appliance: its address binding, persisted state, timer and
/// the publication of everything derived from its readings.
#[derive(Clone)]
pub struct Device {
    config: config::Device,
    corrections: Corrections,
    endpoint: DeviceEndpoint,
    client: Client,
    store: DeviceStore,
    channels: Channels,
    // tokio mutex: held across store writes so reset and integration never interleave
    state: Arc<tokio::sync::Mutex<DeviceState>>,
    controller: Arc<Mutex<PollController>>,
    removed: Arc<AtomicBool>,
}

impl Device {
    /// Restores persisted state. A configured address takes precedence over
    /// the last one persisted, and is persisted in turn.
    pub async fn load(config: config::Device, store: DeviceStore, channels: Channels) -> Result<Self> {
        let client = Client::new(config.request_timeout())?;

        let persisted_ip = store.get_string(KEY_IP).await.unwrap_or_else(|e| {
            error!("device {}: failed to load {}: {}", config.id(), KEY_IP, e);
            None
        });
        let serial = store.get_string(KEY_SN).await.unwrap_or_else(|e| {
            error!("device {}: failed to load {}: {}", config.id(), KEY_SN, e);
            None
        });

        let endpoint = DeviceEndpoint::new(config.id(), None);
        match (config.address(), persisted_ip) {
            (Some(address), persisted) => {
                endpoint.set_address(address)?;
                if persisted.as_deref() != Some(address) {
                    if let Err(e) = store.set_string(KEY_IP, address).await {
                        error!("device {}: failed to persist {}: {}", config.id(), KEY_IP, e);
                    }
                }
            }
            (None, Some(persisted)) => {
                if let Err(e) = endpoint.set_address(&persisted) {
                    warn!("device {}: ignoring persisted address: {}", config.id(), e);
                }
            }
            (None, None) => {
                info!("device {}: no address yet, waiting for discovery", config.id());
            }
        }

        let energy = EnergyMeter::load(config.id(), store.clone()).await;

        Ok(Self {
            corrections: Corrections::for_device(&config),
            config,
            endpoint,
            client,
            store,
            channels,
            state: Arc::new(tokio::sync::Mutex::new(DeviceState {
                energy,
                failures: FailureTracker::default(),
                serial,
                smart_mode_sent: false,
            })),
            controller: Arc::new(Mutex::new(PollController::default())),
            removed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn id(&self) -> &str {
        self.config.id()
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    pub fn poll_state(&self) -> PollState {
        self.controller().state()
    }

    pub async fn energy(&self) -> EnergyState {
        *self.state.lock().await.energy.state()
    }

    pub async fn available(&self) -> bool {
        self.state.lock().await.failures.available()
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.failures.consecutive_failures()
    }

    pub async fn serial(&self) -> Option<String> {
        self.state.lock().await.serial.clone()
    }

    fn controller(&self) -> std::sync::MutexGuard<'_, PollController> {
        self.controller.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts the poll timer. Returns false if it was already running.
    pub fn start(&self) -> bool {
        let device = self.clone();
        let started = self.controller().start(self.config.poll_interval(), move || {
            let device = device.clone();
            async move {
                if let Err(e) = device.poll_once().await {
                    warn!("device {}: {}", device.id(), e);
                }
            }
        });

        if started {
            info!(
                "device {}: polling every {}s",
                self.id(),
                self.config.poll_interval().as_secs()
            );
        }
        started
    }

    /// Stops the poll timer. Safe to call when it is not running.
    pub fn stop(&self) -> bool {
        let stopped = self.controller().stop();
        if stopped {
            info!("device {}: polling stopped", self.id());
        }
        stopped
    }

    /// Stops polling for good; results of requests still out are dropped.
    pub fn remove(&self) {
        self.removed.store(true, Ordering::SeqCst);
        self.stop();
    }

    /// One status request and everything that follows from it.
    ///
    /// Transport failures are absorbed into the availability tracking; only
    /// a missing address is returned as an error.
    pub async fn poll_once(&self) -> Result<PollOutcome, DeviceError> {
        let Some(_in_flight) = InFlight::begin(&self.controller) else {
            debug!("device {}: previous poll still in flight, skipping tick", self.id());
            return Ok(PollOutcome::Skipped);
        };

        let result = self.client.fetch(&self.endpoint, self.config.kind()).await;

        if self.removed.load(Ordering::SeqCst) {
            debug!("device {}: removed during poll, discarding result", self.id());
            return Ok(PollOutcome::Discarded);
        }

        match result {
            Ok(report) => {
                self.handle_report(report).await;
                Ok(PollOutcome::Published)
            }
            Err(DeviceError::Transport(err)) => {
                self.handle_failure(err).await;
                Ok(PollOutcome::Failed)
            }
            Err(err) => Err(err),
        }
    }

    async fn handle_report(&self, report: Report) {
        let mut state = self.state.lock().await;

        let learned_serial = match report.serial() {
            Some(serial) if state.serial.as_deref() != Some(serial) => {
                info!("device {}: serial number {}", self.id(), serial);
                state.serial = Some(serial.to_string());
                if let Err(e) = self.store.set_string(KEY_SN, serial).await {
                    error!("device {}: failed to persist {}: {}", self.id(), KEY_SN, e);
                }
                true
            }
            _ => false,
        };

        match &report {
            Report::Battery(reading) => self.publish_battery(&mut state, reading).await,
            Report::Meter(reading) => self.publish_meter(reading),
        }

        if state.failures.record_success() == Transition::BecameAvailable {
            info!("device {}: available again", self.id());
        }
        // published on every success so late subscribers and restarts see it
        self.publish(Message::for_availability(self.id(), true));

        let needs_smart_mode = self.config.kind() == DeviceKind::Battery
            && !state.smart_mode_sent
            && state.serial.is_some();
        if needs_smart_mode {
            state.smart_mode_sent = true;
            let serial = state.serial.clone();
            drop(state);

            if learned_serial {
                debug!("device {}: serial just learned, enabling smart mode", self.id());
            }
            match self
                .client
                .send(&self.endpoint, serial.as_deref(), &Properties::smart_mode())
                .await
            {
                Ok(_) => info!("device {}: smart mode enabled", self.id()),
                Err(e) => error!("device {}: failed to enable smart mode: {}", self.id(), e),
            }
        }
    }

    async fn publish_battery(&self, state: &mut DeviceState, reading: &Reading) {
        let corrected = corrector::correct(reading, &self.corrections);
        state
            .energy
            .record(corrected.net_power_w, reading.timestamp_ms)
            .await;

        let status = BatteryStatus::new(&corrected, state.energy.state());
        debug!("device {}: {:?}", self.id(), status);

        self.publish_value("power", &status.power);
        self.publish_value("battery", &status.battery);
        if let Some(t) = status.temperature {
            self.publish_value("temperature", &t);
        }
        if let Some(t) = status.pack_temperature {
            self.publish_value("pack_temperature", &t);
        }
        self.publish_energy(state.energy.state());
        self.publish_value("status", &status);
    }

    fn publish_meter(&self, reading: &MeterReading) {
        debug!("device {}: {:?}", self.id(), reading);

        self.publish_value("power", &reading.total_power);
        for (i, phase) in reading.phase_power.iter().enumerate() {
            if let Some(power) = phase {
                self.publish_value(&format!("power_l{}", i + 1), power);
            }
        }
    }

    fn publish_energy(&self, energy: &EnergyState) {
        self.publish_value("charged", &energy.charged_kwh);
        self.publish_value("discharged", &energy.discharged_kwh);
        self.publish_value("efficiency", &energy.efficiency());
    }

    async fn handle_failure(&self, err: TransportError) {
        let mut state = self.state.lock().await;
        let transition = state.failures.record_failure();
        warn!(
            "device {}: poll failed ({} in a row): {}",
            self.id(),
            state.failures.consecutive_failures(),
            err
        );

        if transition == Transition::BecameUnavailable {
            error!("device {}: unavailable", self.id());
            self.publish(Message::for_availability(self.id(), false));
        }
    }

    /// Sets the power target; negative watts charge from the grid.
    pub async fn set_power(&self, watts: i32) -> Result<Ack, DeviceError> {
        info!("device {}: setting power to {}W", self.id(), watts);
        let serial = self.serial().await;
        self.client
            .send(&self.endpoint, serial.as_deref(), &Properties::power_target(watts))
            .await
    }

    /// Zeroes both meters and republishes them.
    pub async fn reset_meters(&self) {
        let mut state = self.state.lock().await;
        state.energy.reset().await;
        self.publish_energy(state.energy.state());
    }

    /// Rebinds the device to a new address. Accumulated state is kept.
    ///
    /// Once rebound, polling uses the new address whether or not it could be
    /// persisted; a store failure is only logged.
    pub async fn set_address(&self, address: &str) -> Result<(), DeviceError> {
        let address = address.trim();
        if self.endpoint.set_address(address)? {
            info!("device {}: address is now {}", self.id(), address);
            if let Err(e) = self.store.set_string(KEY_IP, address).await {
                error!("device {}: failed to persist {}: {}", self.id(), KEY_IP, e);
            }
        }
        Ok(())
    }

    pub async fn process_command(&self, command: Command) -> Result<()> {
        use Command::*;

        match command {
            SetPower(_, watts) => {
                if self.config.kind() != DeviceKind::Battery {
                    bail!("device {} is a {} and takes no power target", self.id(), self.config.kind());
                }
                self.set_power(watts).await?;
            }
            ResetMeters(_) => {
                if self.config.kind() != DeviceKind::Battery {
                    bail!("device {} is a {} and has no meters", self.id(), self.config.kind());
                }
                self.reset_meters().await;
            }
            SetAddress(_, address) => self.set_address(&address).await?,
        }

        Ok(())
    }

    fn publish_value<T: Serialize>(&self, name: &str, value: &T) {
        match Message::for_value(self.id(), name, value) {
            Ok(message) => self.publish(message),
            Err(e) => warn!("device {}: cannot encode {}: {}", self.id(), name, e),
        }
    }

    fn publish(&self, message: Message) {
        // no receivers just means nothing is listening yet
        let _ = self.channels.to_mqtt.send(mqtt::ChannelData::Message(message));
    }
}
