use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TargetDevice {
    Id(String),
    All,
}

impl Message {
    pub fn for_value<T: serde::Serialize>(device: &str, name: &str, value: &T) -> Result<Message> {
        Ok(Message {
            topic: format!("{}/{}", device, name),
            retain: false,
            payload: serde_json::to_string(value)?,
        })
    }

    pub fn for_availability(device: &str, available: bool) -> Message {
        Message {
            topic: format!("{}/available", device),
            retain: true,
            payload: if available { "online" } else { "offline" }.to_string(),
        }
    }

    pub fn for_result(command: &Command, ok: bool) -> Message {
        Message {
            topic: command.to_result_topic(),
            retain: false,
            payload: if ok { "OK" } else { "FAIL" }.to_string(),
        }
    }

    pub fn to_command(&self, device: config::Device) -> Result<Command> {
        use Command::*;

        let (_target, parts) = self.split_cmd_topic()?;

        let r = match parts[..] {
            ["set", "power"] => SetPower(device, self.payload_int()?),
            ["reset_meters"] => ResetMeters(device),
            ["set", "address"] => SetAddress(device, self.payload.trim().to_string()),
            [..] => bail!("unhandled: {:?}", self),
        };

        Ok(r)
    }

    // given a cmd Message, return the device it is intended for.
    //
    // eg cmd/hub/set/power => (hub, ['set', 'power'])
    pub fn split_cmd_topic(&self) -> Result<(TargetDevice, Vec<&str>)> {
        let parts: Vec<&str> = self.topic.split('/').collect();

        // our subscriptions are all cmd/{device}/#, anything else is noise
        if parts.len() < 3 || parts[0] != "cmd" {
            bail!("ignoring badly formed MQTT topic: {}", self.topic);
        }

        let device = parts[1];
        let rest = parts[2..].to_vec();

        if device == "all" {
            Ok((TargetDevice::All, rest))
        } else {
            Ok((TargetDevice::Id(device.to_string()), rest))
        }
    }

    fn payload_int(&self) -> Result<i32> {
        self.payload
            .trim()
            .parse()
            .map_err(|err| anyhow!("payload_int: {}", err))
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("zendure-bridge", c.mqtt().host(), c.mqtt().port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!("initializing mqtt at {}:{}", c.mqtt().host(), c.mqtt().port());

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping MQTT client...");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
        let _ = self.channels.from_mqtt.send(ChannelData::Shutdown);
        Ok(())
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        client
            .subscribe(
                format!("{}/cmd/all/#", self.config.mqtt().namespace()),
                QoS::AtMostOnce,
            )
            .await?;

        for device in self.config.enabled_devices() {
            client
                .subscribe(
                    format!("{}/cmd/{}/#", self.config.mqtt().namespace(), device.id()),
                    QoS::AtMostOnce,
                )
                .await?;
        }

        Ok(())
    }

    // mqtt -> coordinator
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.to_mqtt.subscribe();

        loop {
            tokio::select! {
                msg = shutdown.recv() => {
                    if let Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) = msg {
                        info!("MQTT receiver shutting down");
                        break;
                    }
                }
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            if let Err(e) = self.handle_message(publish) {
                                warn!("{}", e);
                            }
                        }
                        Err(e) => {
                            error!("{}", e);
                            info!("reconnecting in 5s");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                        _ => {} // keepalives etc
                    }
                }
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        // remove the namespace, including the first /
        // doing it this way means we don't break if namespace happens to contain a /
        let namespace_len = self.config.mqtt().namespace().len() + 1;
        if publish.topic.len() <= namespace_len {
            bail!("ignoring MQTT topic outside namespace: {}", publish.topic);
        }
        let topic = publish.topic[namespace_len..].to_owned();

        let message = Message {
            topic,
            retain: publish.retain,
            payload: String::from_utf8(publish.payload.to_vec())?,
        };
        debug!("RX: {:?}", message);
        if self
            .channels
            .from_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_mqtt) failed - channel closed?");
        }

        Ok(())
    }

    // devices/coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            match receiver.recv().await {
                Ok(Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client.disconnect().await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("MQTT sender lagging, dropped {} messages", n);
                }
                Ok(Message(message)) => {
                    let topic = format!("{}/{}", self.config.mqtt().namespace(), message.topic);
                    debug!("publishing: {} = {}", topic, message.payload);
                    let payload = message.payload.as_bytes().to_vec();
                    let mut retry_count = 0;
                    while retry_count < 3 {
                        match client.publish(&topic, QoS::AtLeastOnce, message.retain, payload.as_slice()).await {
                            Ok(_) => break,
                            Err(err) => {
                                error!("MQTT publish failed: {:?} - retrying in 10s (attempt {}/3)", err, retry_count + 1);
                                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                                retry_count += 1;
                            }
                        }
                    }
                }
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}
