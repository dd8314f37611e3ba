use crate::prelude::*;
use crate::coordinator::Source;
use crate::omnik::field::Field;
use crate::omnik::packet::{Request, Response, Value, MAX_RESPONSE_LEN};

use {
    async_trait::async_trait,
    bytes::Bytes,
    std::time::Duration,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::TcpStream,
};

use crate::error::Error;

// Serial {{{
/// Inverter serial number, as printed on the wifi module.
///
/// The wire format only has room for four bytes, so anything that doesn't fit
/// in a non-zero u32 is rejected up front.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Serial(u32);

impl Serial {
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Big-endian, always exactly four bytes (leading zero bytes included).
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl TryFrom<u64> for Serial {
    type Error = Error;

    fn try_from(serial: u64) -> Result<Self, Self::Error> {
        match u32::try_from(serial) {
            Ok(s) if s > 0 => Ok(Self(s)),
            _ => Err(Error::InvalidSerial(serial)),
        }
    }
}

impl std::str::FromStr for Serial {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u64 = s
            .trim()
            .parse()
            .map_err(|err| anyhow!("inverter.rs:{} is not a serial number: {}", s, err))?;
        Ok(Self::try_from(n)?)
    }
}

impl std::fmt::Display for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:08x})", self.0, self.0)
    }
} // }}}

// fetch {{{
/// One request/response exchange with the inverter.
///
/// The connection lives only inside this call and is closed on every path out
/// of it. Failures are logged and come back as `None`; retrying is up to the
/// caller's next cycle.
pub async fn fetch(host: &str, port: u16, serial: Serial, timeout: Option<Duration>) -> Option<Bytes> {
    let exchange = exchange(host, port, Request::new(serial));

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, exchange).await {
            Ok(r) => r,
            Err(_) => Err(anyhow!("timeout after {}s", limit.as_secs_f32())),
        },
        None => exchange.await,
    };

    match result {
        Ok(raw) => {
            debug!("inverter {}: RX {}", serial, hex::encode(&raw));
            Some(raw)
        }
        Err(e) => {
            error!("Could not connect to the inverter on {}:{}: {}", host, port, e);
            None
        }
    }
}

async fn exchange(host: &str, port: u16, request: Request) -> Result<Bytes> {
    let mut stream = TcpStream::connect((host, port)).await?;

    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    debug!("inverter {}:{}: TX {}", host, port, hex::encode(request.bytes()));
    stream.write_all(request.bytes()).await?;
    stream.flush().await?;

    let mut buf = vec![0u8; MAX_RESPONSE_LEN];
    let len = stream.read(&mut buf).await?;
    if len == 0 {
        bail!("connection closed before any data was received");
    }
    buf.truncate(len);

    Ok(Bytes::from(buf))
} // }}}

// Inverter {{{
/// The inverter as a data source: the last response received and the
/// connection details needed to get the next one.
pub struct Inverter {
    host: String,
    port: u16,
    serial: Serial,
    timeout: Option<Duration>,
    response: Response,
}

impl Inverter {
    pub fn new(config: &config::Inverter) -> Result<Self, Error> {
        Ok(Self {
            host: config.host().to_owned(),
            port: config.port(),
            serial: config.serial()?,
            timeout: config.timeout(),
            response: Response::absent(),
        })
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn response(&self) -> &Response {
        &self.response
    }
}

#[async_trait]
impl Source for Inverter {
    fn name(&self) -> &'static str {
        "inverter"
    }

    async fn refresh(&mut self) -> bool {
        // replaced wholesale; nothing from the previous cycle survives
        self.response = Response::new(fetch(&self.host, self.port, self.serial, self.timeout).await);
        self.response.is_present()
    }

    fn supports(&self, field: &Field) -> bool {
        matches!(field, Field::Status) || field.spec().is_some()
    }

    fn read(&self, field: &Field) -> Option<Value> {
        let value = match field {
            Field::Status => Some(self.response.status()),
            _ => field.spec().and_then(|spec| self.response.decode(&spec)),
        };
        trace!("inverter {}: {} = {:?}", self.serial, field, value);
        value
    }
} // }}}
