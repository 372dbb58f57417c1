//! HTTP API of Zendure appliances (`/properties/report`, `/properties/write`).

pub mod client;
pub mod report;

pub use client::{Ack, Client, Properties};
pub use report::{DeviceInfo, MeterReading, Reading, Report};
