use crate::prelude::*;
use crate::omnik::field::{Field, Sensor};
use crate::omnik::packet::Value;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

/// Sensor name -> value for one cycle. `None` means "no data this cycle".
pub type Readings = BTreeMap<String, Option<Value>>;

// Source {{{
/// Something that can answer field reads: the inverter or the portal.
///
/// `refresh` replaces whatever the source held from the previous cycle; reads
/// only ever see the latest refresh.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns false when nothing could be retrieved this cycle.
    async fn refresh(&mut self) -> bool;

    fn supports(&self, field: &Field) -> bool;

    fn read(&self, field: &Field) -> Option<Value>;
} // }}}

// PollStats {{{
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PollStats {
    pub polls: u64,
    pub throttled: u64,
    pub inverter_failures: u64,
    pub inverter_offline: u64,
    pub portal_failures: u64,
}

impl PollStats {
    pub fn print_summary(&self) {
        info!("Poll Statistics:");
        info!("  Polls: {}", self.polls);
        info!("  Throttled: {}", self.throttled);
        info!("  Inverter:");
        info!("    Unreachable: {}", self.inverter_failures);
        info!("    Powered down: {}", self.inverter_offline);
        info!("  Portal:");
        info!("    Failures: {}", self.portal_failures);
    }
} // }}}

/// Polls the configured sources and merges their values.
///
/// Polls closer together than `min_interval` are answered from the previous
/// result without touching the network. `poll` takes `&mut self`, so two polls
/// against the same device can't overlap.
pub struct Coordinator {
    inverter: Option<Box<dyn Source>>,
    portal: Option<Box<dyn Source>>,
    sensors: Vec<Sensor>,
    min_interval: Duration,
    last_poll: Option<Instant>,
    readings: Readings,
    pub stats: Arc<Mutex<PollStats>>,
}

impl Coordinator {
    pub fn new(config: &Config) -> Result<Self> {
        let inverter = match config.inverter() {
            Some(c) => Some(Box::new(omnik::inverter::Inverter::new(c)?) as Box<dyn Source>),
            None => None,
        };
        let portal = match config.portal() {
            Some(c) => Some(Box::new(portal::Portal::new(c)?) as Box<dyn Source>),
            None => None,
        };

        Ok(Self::with_sources(
            inverter,
            portal,
            config.sensors()?,
            config.min_interval(),
        ))
    }

    pub fn with_sources(
        inverter: Option<Box<dyn Source>>,
        portal: Option<Box<dyn Source>>,
        sensors: Vec<Sensor>,
        min_interval: Duration,
    ) -> Self {
        let readings = sensors.iter().map(|s| (s.name.clone(), None)).collect();

        Self {
            inverter,
            portal,
            sensors,
            min_interval,
            last_poll: None,
            readings,
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    pub fn readings(&self) -> &Readings {
        &self.readings
    }

    pub async fn poll(&mut self) -> Readings {
        let now = Instant::now();

        if let Some(last) = self.last_poll {
            let elapsed = now.duration_since(last);
            if elapsed < self.min_interval {
                debug!(
                    "poll throttled: {}s since last update, minimum is {}s",
                    elapsed.as_secs(),
                    self.min_interval.as_secs()
                );
                if let Ok(mut stats) = self.stats.lock() {
                    stats.throttled += 1;
                }
                return self.readings.clone();
            }
        }
        self.last_poll = Some(now);

        let inverter_received = match self.inverter.as_mut() {
            Some(inverter) => Some(inverter.refresh().await),
            None => None,
        };
        let portal_received = match self.portal.as_mut() {
            Some(portal) => Some(portal.refresh().await),
            None => None,
        };

        // one liveness probe per cycle, shared by every field below
        let reachable = self
            .inverter
            .as_ref()
            .map(|inverter| inverter.read(&Field::Temperature).is_some())
            .unwrap_or(false);

        if let Ok(mut stats) = self.stats.lock() {
            stats.polls += 1;
            match inverter_received {
                Some(false) => stats.inverter_failures += 1,
                Some(true) if !reachable => stats.inverter_offline += 1,
                _ => {}
            }
            if portal_received == Some(false) {
                stats.portal_failures += 1;
            }
        }

        if self.inverter.is_some() {
            info!("inverter is {}", if reachable { "online" } else { "offline" });
        }

        self.readings = self
            .sensors
            .iter()
            .map(|sensor| (sensor.name.clone(), self.read_field(&sensor.field, reachable)))
            .collect();

        self.readings.clone()
    }

    fn read_field(&self, field: &Field, reachable: bool) -> Option<Value> {
        let inverter = self.inverter.as_deref();
        let portal = self.portal.as_deref();

        if let Field::Status = field {
            // the inverter always has an opinion on its own status, even unreachable
            return inverter.and_then(|i| i.read(field));
        }

        let live_inverter = inverter.filter(|_| reachable);
        let order = if field.is_income() {
            [portal, live_inverter]
        } else {
            [live_inverter, portal]
        };

        let source = order.into_iter().flatten().find(|s| s.supports(field))?;
        let value = source.read(field);
        trace!("{} from {}: {:?}", field, source.name(), value);
        value
    }
}
