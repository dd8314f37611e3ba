use crate::prelude::*;
use crate::error::Error;
use crate::omnik::field::Sensor;

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Datasource {
    Inverter,
    Portal,
    InverterAndPortal,
}

impl Datasource {
    pub fn uses_inverter(&self) -> bool {
        matches!(self, Self::Inverter | Self::InverterAndPortal)
    }

    pub fn uses_portal(&self) -> bool {
        matches!(self, Self::Portal | Self::InverterAndPortal)
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub datasource: Datasource,

    pub inverter: Option<Inverter>,
    pub portal: Option<Portal>,

    #[serde(default)]
    pub sensors: Vec<String>,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_scan_interval")]
    pub scan_interval: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_min_interval")]
    pub min_interval: Duration,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    #[serde(default)]
    pub mqtt: Mqtt,
}

// Inverter {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    #[serde(default)]
    pub host: String,
    #[serde(default = "Config::default_inverter_port")]
    pub port: u16,
    pub serial: Option<u64>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub timeout: Option<Duration>,
}
impl Inverter {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn serial(&self) -> Result<Serial, Error> {
        let serial = self.serial.ok_or(Error::MissingParameter("inverter.serial"))?;
        Serial::try_from(serial)
    }

    // no timeout means we wait for the OS to give up on the socket
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
} // }}}

// Portal {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Portal {
    #[serde(default)]
    pub host: String,
    #[serde(default = "Config::default_portal_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_portal_timeout")]
    pub timeout: Duration,
}
impl Portal {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or_default()
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_host")]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}
impl Default for Mqtt {
    fn default() -> Self {
        Self {
            enabled: false,
            host: Config::default_mqtt_host(),
            port: Config::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Config::default_mqtt_namespace(),
        }
    }
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The inverter section, but only when the datasource actually reads from it.
    pub fn inverter(&self) -> Option<&Inverter> {
        self.inverter.as_ref().filter(|_| self.datasource.uses_inverter())
    }

    pub fn portal(&self) -> Option<&Portal> {
        self.portal.as_ref().filter(|_| self.datasource.uses_portal())
    }

    /// Sensor names resolved to fields.
    pub fn sensors(&self) -> Result<Vec<Sensor>, Error> {
        self.sensors.iter().map(|s| s.parse()).collect()
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    pub fn mqtt(&self) -> &Mqtt {
        &self.mqtt
    }

    /// Topic segment identifying this installation: the inverter serial, or
    /// `portal` when only the portal is read.
    pub fn device_id(&self) -> String {
        match self.inverter().and_then(|inv| inv.serial().ok()) {
            Some(serial) => serial.to_string(),
            None => "portal".to_owned(),
        }
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Datasource: {:?}", self.datasource);
        if let Some(inv) = self.inverter() {
            info!("  Inverter:");
            info!("    Host: {}", inv.host);
            info!("    Port: {}", inv.port);
            info!("    Serial: {}", inv.serial.map(|s| s.to_string()).unwrap_or_default());
            match inv.timeout {
                Some(t) => info!("    Timeout: {}s", t.as_secs()),
                None => info!("    Timeout: none"),
            }
        }
        if let Some(portal) = self.portal() {
            info!("  Portal:");
            info!("    Host: {}", portal.host);
            info!("    Port: {}", portal.port);
            info!("    Username: {}", portal.username());
            info!("    Timeout: {}s", portal.timeout.as_secs());
        }
        info!("  Sensors: {}", self.sensors.join(", "));
        info!("  Scan Interval: {}s", self.scan_interval.as_secs());
        info!("  Min Interval: {}s", self.min_interval.as_secs());
        info!("  MQTT: {}", if self.mqtt.enabled { "enabled" } else { "disabled" });
        if self.mqtt.enabled {
            info!("    Host: {}", self.mqtt.host);
            info!("    Port: {}", self.mqtt.port);
            info!("    Namespace: {}", self.mqtt.namespace);
        }
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<(), Error> {
        if self.datasource.uses_inverter() {
            let inv = self
                .inverter
                .as_ref()
                .ok_or(Error::MissingParameter("inverter"))?;
            if inv.host.is_empty() {
                return Err(Error::MissingParameter("inverter.host"));
            }
            if inv.port == 0 {
                return Err(Error::InvalidConfig(
                    "inverter.port must be between 1 and 65535".to_owned(),
                ));
            }
            inv.serial()?;
        }

        if self.datasource.uses_portal() {
            let portal = self.portal.as_ref().ok_or(Error::MissingParameter("portal"))?;
            if portal.host.is_empty() {
                return Err(Error::MissingParameter("portal.host"));
            }
            if portal.port == 0 {
                return Err(Error::InvalidConfig(
                    "portal.port must be between 1 and 65535".to_owned(),
                ));
            }
            if portal.username().is_empty() {
                return Err(Error::MissingParameter("portal.username"));
            }
            if portal.password().is_empty() {
                return Err(Error::MissingParameter("portal.password"));
            }
        }

        if self.sensors.is_empty() {
            return Err(Error::MissingParameter("sensors"));
        }
        self.sensors()?;

        if self.scan_interval.is_zero() {
            return Err(Error::InvalidConfig("scan_interval cannot be 0".to_owned()));
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                return Err(Error::InvalidConfig(
                    "mqtt.port must be between 1 and 65535".to_owned(),
                ));
            }
            if self.mqtt.host.is_empty() {
                return Err(Error::MissingParameter("mqtt.host"));
            }
        }

        Ok(())
    }

    fn default_inverter_port() -> u16 {
        8899
    }

    fn default_portal_port() -> u16 {
        10000
    }

    fn default_portal_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_scan_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_min_interval() -> Duration {
        Duration::from_secs(60)
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "omnik".to_string()
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
