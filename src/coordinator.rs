use crate::prelude::*;
use crate::device::Device;

use std::collections::HashMap;
use std::sync::Arc;

/// Routes inbound MQTT commands to the devices they address and reports
/// the outcome of each on its result topic.
#[derive(Clone)]
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    devices: Arc<HashMap<String, Device>>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, channels: Channels, devices: Vec<Device>) -> Self {
        let devices = devices
            .into_iter()
            .map(|d| (d.id().to_string(), d))
            .collect();

        Self {
            config,
            channels,
            devices: Arc::new(devices),
        }
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub async fn start(&self) -> Result<()> {
        if self.config.mqtt().enabled() {
            self.mqtt_receiver().await?;
        }

        Ok(())
    }

    pub fn stop(&self) {
        if self.config.mqtt().enabled() {
            let _ = self.channels.from_mqtt.send(mqtt::ChannelData::Shutdown);
        }
    }

    async fn mqtt_receiver(&self) -> Result<()> {
        let mut receiver = self.channels.from_mqtt.subscribe();

        loop {
            match receiver.recv().await {
                Ok(mqtt::ChannelData::Message(message)) => {
                    if let Err(e) = self.process_message(message).await {
                        warn!("{}", e);
                    }
                }
                Ok(mqtt::ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("coordinator lagging, dropped {} commands", n);
                }
            }
        }

        info!("coordinator loop exiting");
        Ok(())
    }

    pub async fn process_message(&self, message: mqtt::Message) -> Result<()> {
        for device in self.config.devices_for_message(&message)? {
            match message.to_command(device) {
                Ok(command) => {
                    info!("parsed command {:?}", command);
                    let result = self.process_command(command.clone()).await;
                    if let Err(e) = &result {
                        error!("{:?} failed: {}", command, e);
                    }

                    let reply = mqtt::Message::for_result(&command, result.is_ok());
                    if self
                        .channels
                        .to_mqtt
                        .send(mqtt::ChannelData::Message(reply))
                        .is_err()
                    {
                        bail!("send(to_mqtt) failed - channel closed?");
                    }
                }
                Err(err) => {
                    error!("{:?}", err);
                }
            }
        }

        Ok(())
    }

    async fn process_command(&self, command: Command) -> Result<()> {
        let id = command.device().id();
        let Some(device) = self.devices.get(id) else {
            bail!("no running device with id {}", id);
        };

        device.process_command(command).await
    }
}
