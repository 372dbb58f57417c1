#![allow(dead_code)]

pub use zendure_bridge::config::DeviceKind;
pub use zendure_bridge::device::{Device, PollOutcome};
pub use zendure_bridge::prelude::*;
pub use zendure_bridge::store::{DeviceStore, MemoryStore, Store};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory();
impl Factory {
    pub fn battery(address: Option<&str>) -> config::Device {
        let mut device = config::Device::new("hub", DeviceKind::Battery);
        device.address = address.map(str::to_string);
        device
    }

    pub fn meter(address: Option<&str>) -> config::Device {
        let mut device = config::Device::new("p1", DeviceKind::Meter);
        device.address = address.map(str::to_string);
        device
    }

    pub fn memory_store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    pub async fn device(config: config::Device, store: Arc<dyn Store>, channels: &Channels) -> Device {
        let device_store = DeviceStore::new(store, config.id());
        Device::load(config, device_store, channels.clone())
            .await
            .expect("device should load")
    }

    pub fn battery_report(grid_input: f64, output_home: f64, level: u32) -> String {
        serde_json::json!({
            "timestamp": 1700000000,
            "messageId": 12,
            "sn": "HOA1NAN9N385989",
            "product": "solarFlow800Pro",
            "properties": {
                "gridInputPower": grid_input,
                "outputHomePower": output_home,
                "electricLevel": level,
                "minSoc": 100,
                "hyperTmp": 2981,
                "acMode": 2
            },
            "packData": [
                { "sn": "P1", "maxTemp": 2800 },
                { "sn": "P2", "maxTemp": 3000 }
            ]
        })
        .to_string()
    }

    pub fn meter_report(total: f64) -> String {
        serde_json::json!({
            "sn": "M1",
            "total_power": total,
            "a_aprt_power": total / 2.0,
            "b_aprt_power": total / 2.0,
        })
        .to_string()
    }
}

/// Drains everything published so far into (topic, payload) pairs.
pub fn published(receiver: &mut broadcast::Receiver<mqtt::ChannelData>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    while let Ok(data) = receiver.try_recv() {
        if let mqtt::ChannelData::Message(m) = data {
            out.push((m.topic, m.payload));
        }
    }
    out
}

pub fn payload_for(messages: &[(String, String)], topic: &str) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|(t, _)| t == topic)
        .map(|(_, p)| p.clone())
}

/// A device that accepts connections and never answers. Returns its address
/// and a count of accepted connections.
pub async fn silent_device() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            open.push(socket);
        }
    });

    (address, accepted)
}
