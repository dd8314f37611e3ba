use crate::prelude::*;
use crate::coordinator::Readings;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    /// One message per sensor, then the whole map under `all`.
    ///
    /// Absent readings are published as `null` so subscribers can tell a
    /// missed cycle from a zero.
    pub fn for_readings(device: &str, readings: &Readings) -> Result<Vec<Message>> {
        let mut r = Vec::with_capacity(readings.len() + 1);

        for (sensor, value) in readings {
            r.push(Message {
                topic: format!("{}/{}", device, sensor),
                retain: false,
                payload: serde_json::to_string(value)?,
            });
        }

        r.push(Message {
            topic: format!("{}/all", device),
            retain: false,
            payload: serde_json::to_string(readings)?,
        });

        Ok(r)
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

pub struct Mqtt {
    config: config::Mqtt,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: config::Mqtt, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("omnik-bridge", c.host(), c.port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.username(), c.password()) {
            options.set_credentials(u, p);
        }

        info!("initializing mqtt at {}:{}", c.host(), c.port());

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        Ok(())
    }

    // drives the connection until the sender's disconnect has gone out.
    // nothing is subscribed, so incoming publishes are unexpected.
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.shutdown.subscribe();
        let mut stopping = false;

        loop {
            tokio::select! {
                _ = shutdown.recv(), if !stopping => stopping = true,
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            debug!("ignoring RX on {}", publish.topic);
                        }
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                        Err(e) if stopping => {
                            warn!("giving up on mqtt during shutdown: {}", e);
                            break;
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

    // scheduler -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            match receiver.recv().await? {
                Shutdown => {
                    let _ = client
                        .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "offline")
                        .await;
                    let _ = client.disconnect().await;
                    break;
                }
                Message(message) => {
                    let topic = format!("{}/{}", self.config.namespace(), message.topic);
                    debug!("publishing: {} = {}", topic, message.payload);
                    if let Err(err) = client
                        .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload)
                        .await
                    {
                        error!("MQTT publish to {} failed: {:?}", topic, err);
                    }
                }
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.namespace())
    }
}
