use clap::Parser;

/// omnik-bridge - publishes Omnik inverter readings to MQTT
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// Poll once, print the readings as JSON and exit
    #[clap(long)]
    pub once: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
