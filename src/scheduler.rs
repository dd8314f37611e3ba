use crate::prelude::*;
use crate::coordinator::{Coordinator, Readings};

use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub struct Scheduler {
    coordinator: Coordinator,
    device_id: String,
    scan_interval: Duration,
    channels: Channels,
}

impl Scheduler {
    pub fn new(config: &Config, coordinator: Coordinator, channels: Channels) -> Self {
        Self {
            coordinator,
            device_id: config.device_id(),
            scan_interval: config.scan_interval(),
            channels,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Polls every `scan_interval` until shutdown, then tells the MQTT sender
    /// to stop.
    pub async fn start(&mut self) -> Result<()> {
        let mut shutdown = self.channels.shutdown.subscribe();

        let mut interval = tokio::time::interval(self.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    self.tick().await?;
                }
            }
        }

        info!("scheduler shutting down");
        let _ = self.channels.to_mqtt.send(mqtt::ChannelData::Shutdown);

        Ok(())
    }

    pub async fn tick(&mut self) -> Result<Readings> {
        let readings = self.coordinator.poll().await;

        for message in mqtt::Message::for_readings(&self.device_id, &readings)? {
            // no receivers while mqtt is disabled
            if self
                .channels
                .to_mqtt
                .send(mqtt::ChannelData::Message(message))
                .is_err()
            {
                debug!("send(to_mqtt) failed - no subscribers");
                break;
            }
        }

        Ok(readings)
    }
}
