pub use crate::{
    channels::Channels,
    config::{self, Config},
    coordinator, mqtt, omnik,
    omnik::inverter::Serial,
    options::Options,
    portal,
};

pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;
