#![allow(dead_code)]

pub use omnik_bridge::prelude::*;

use async_trait::async_trait;
use omnik_bridge::coordinator::Source;
use omnik_bridge::omnik::field::Field;
use omnik_bridge::omnik::packet::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const SERIAL: u64 = 1608402838;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory();
impl Factory {
    pub fn serial() -> Serial {
        Serial::try_from(SERIAL).unwrap()
    }

    /// A 128 byte statistics frame from an inverter that is up and producing.
    pub fn response() -> Vec<u8> {
        let mut r = vec![0u8; 128];
        let mut put = |at: usize, bytes: &[u8]| r[at..at + bytes.len()].copy_from_slice(bytes);

        put(0, &[0x68, 0x7d, 0x41, 0xb0]);
        put(15, b"NLDN302013B71234");
        put(31, &[0x01, 0x90]); // temperature 40.0
        put(33, &[0x0b, 0xb8]); // dc voltage 1: 300.0
        put(35, &[0x0b, 0x86]); // dc voltage 2: 295.0
        put(37, &[0xff, 0xff]); // dc voltage 3: not connected
        put(39, &[0x00, 0x2d]); // dc current 1: 4.5
        put(45, &[0x00, 0x32]); // ac current 1: 5.0
        put(51, &[0x09, 0x2a]); // ac voltage 1: 234.6
        put(57, &[0x13, 0x88]); // ac frequency 1: 50.0
        put(59, &[0x04, 0xd2]); // ac power 1: 1234
        put(69, &[0x02, 0x0d]); // energy today: 5.25
        put(71, &[0x00, 0x00, 0x30, 0x39]); // energy total: 1234.5
        put(75, &[0x00, 0x00, 0x10, 0x00]); // hours: 4096

        r
    }

    /// Same frame, but the temperature reads as a powered down inverter.
    pub fn response_offline() -> Vec<u8> {
        let mut r = Self::response();
        r[31..33].copy_from_slice(&[0x07, 0xd0]);
        r
    }

    pub fn inverter_config(port: u16) -> config::Inverter {
        config::Inverter {
            host: "127.0.0.1".to_owned(),
            port,
            serial: Some(SERIAL),
            timeout: Some(std::time::Duration::from_secs(2)),
        }
    }

    pub fn portal_config(host_with_port: &str) -> config::Portal {
        let (host, port) = host_with_port.rsplit_once(':').unwrap();
        config::Portal {
            host: host.to_owned(),
            port: port.parse().unwrap(),
            username: Some("user".to_owned()),
            password: Some("secret".to_owned()),
            timeout: std::time::Duration::from_secs(5),
        }
    }
}

// FakeInverter {{{
/// A TCP server that answers every connection with the same reply.
pub struct FakeInverter {
    pub port: u16,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeInverter {
    pub async fn start(reply: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (c, r) = (connections.clone(), requests.clone());
        let task = tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(_) => break,
                };
                c.fetch_add(1, Ordering::SeqCst);

                let mut request = [0u8; 16];
                if socket.read_exact(&mut request).await.is_ok() {
                    r.lock().unwrap().push(request.to_vec());
                    let _ = socket.write_all(&reply).await;
                }
            }
        });

        Self {
            port,
            connections,
            requests,
            task,
        }
    }

    /// Closes the listener; later connections to `port` are refused.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }
} // }}}

/// A port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// MockSource {{{
/// A source with canned values that counts how often it is refreshed.
pub struct MockSource {
    name: &'static str,
    values: HashMap<Field, Value>,
    supported: Vec<Field>,
    received: bool,
    pub refreshes: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new(name: &'static str, values: Vec<(Field, Value)>) -> Self {
        let supported = values.iter().map(|(f, _)| *f).collect();
        Self {
            name,
            values: values.into_iter().collect(),
            supported,
            received: true,
            refreshes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn supporting(mut self, fields: &[Field]) -> Self {
        self.supported.extend_from_slice(fields);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.received = false;
        self.values.clear();
        self
    }

    pub fn boxed(self) -> Option<Box<dyn Source>> {
        Some(Box::new(self))
    }
}

#[async_trait]
impl Source for MockSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn refresh(&mut self) -> bool {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.received
    }

    fn supports(&self, field: &Field) -> bool {
        self.supported.contains(field)
    }

    fn read(&self, field: &Field) -> Option<Value> {
        if *field == Field::Status {
            let status = if self.values.contains_key(&Field::Temperature) {
                "Online"
            } else {
                "Offline"
            };
            return Some(Value::Text(status.to_owned()));
        }
        self.values.get(field).cloned()
    }
} // }}}
