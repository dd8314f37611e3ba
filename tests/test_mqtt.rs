mod common;
use common::*;

use omnik_bridge::coordinator::{Coordinator, Readings};
use omnik_bridge::mqtt::{ChannelData, Message, Mqtt};
use omnik_bridge::omnik::packet::Value;
use omnik_bridge::scheduler::Scheduler;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[test]
fn messages_for_readings() {
    let mut readings = Readings::new();
    readings.insert("actualpower".to_owned(), Some(Value::Int(1234)));
    readings.insert("status".to_owned(), Some(Value::Text("Online".to_owned())));
    readings.insert("temperature".to_owned(), None);

    let messages = Message::for_readings("1608402838", &readings).unwrap();

    assert_eq!(
        messages,
        vec![
            Message {
                topic: "1608402838/actualpower".to_owned(),
                retain: false,
                payload: "1234".to_owned(),
            },
            Message {
                topic: "1608402838/status".to_owned(),
                retain: false,
                payload: "\"Online\"".to_owned(),
            },
            Message {
                topic: "1608402838/temperature".to_owned(),
                retain: false,
                payload: "null".to_owned(),
            },
            Message {
                topic: "1608402838/all".to_owned(),
                retain: false,
                payload: r#"{"actualpower":1234,"status":"Online","temperature":null}"#.to_owned(),
            },
        ]
    );
}

#[tokio::test]
async fn scheduler_tick_publishes_readings() {
    common_setup();

    let server = FakeInverter::start(Factory::response()).await;
    let config = Config::from_yaml(&format!(
        "datasource: inverter\ninverter:\n  host: 127.0.0.1\n  port: {}\n  serial: {}\nsensors: [actualpower, status]\n",
        server.port, SERIAL
    ))
    .unwrap();

    let channels = Channels::new();
    let mut to_mqtt = channels.to_mqtt.subscribe();

    let coordinator = Coordinator::new(&config).unwrap();
    let mut scheduler = Scheduler::new(&config, coordinator, channels.clone());

    let readings = scheduler.tick().await.unwrap();
    assert_eq!(readings["actualpower"], Some(Value::Int(1234)));

    let mut topics = Vec::new();
    while let Ok(ChannelData::Message(m)) = to_mqtt.try_recv() {
        topics.push(m.topic);
    }
    assert_eq!(
        topics,
        vec!["1608402838/actualpower", "1608402838/status", "1608402838/all"]
    );
    assert_eq!(scheduler.coordinator().stats.lock().unwrap().polls, 1);
}

#[tokio::test]
async fn scheduler_stops_on_shutdown() {
    common_setup();

    let server = FakeInverter::start(Factory::response()).await;
    let config = Config::from_yaml(&format!(
        "datasource: inverter\ninverter:\n  host: 127.0.0.1\n  port: {}\n  serial: {}\nsensors: [actualpower]\n",
        server.port, SERIAL
    ))
    .unwrap();

    let channels = Channels::new();
    let mut to_mqtt = channels.to_mqtt.subscribe();
    let coordinator = Coordinator::new(&config).unwrap();
    let mut scheduler = Scheduler::new(&config, coordinator, channels.clone());

    let shutdown = channels.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let _ = shutdown.send(());
    });

    scheduler.start().await.unwrap();

    // first tick fires straight away, then the scheduler hands over shutdown
    let mut last = None;
    while let Ok(data) = to_mqtt.try_recv() {
        last = Some(data);
    }
    assert_eq!(last, Some(ChannelData::Shutdown));
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn mqtt_publishes_offline_and_disconnects_on_shutdown() {
    common_setup();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // accepts CONNECT, answers CONNACK and records everything after it
    let broker = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut connect = [0u8; 512];
        socket.read(&mut connect).await.unwrap();
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let mut received = Vec::new();
        let _ = socket.read_to_end(&mut received).await;
        received
    });

    let config = config::Mqtt {
        enabled: true,
        host: "127.0.0.1".to_owned(),
        port,
        username: None,
        password: None,
        namespace: "omnik".to_owned(),
    };
    let channels = Channels::new();
    let mqtt = Mqtt::new(config, channels.clone());
    let client = tokio::spawn(async move { mqtt.start().await });

    tokio::time::sleep(Duration::from_millis(300)).await;

    channels
        .to_mqtt
        .send(ChannelData::Message(Message {
            topic: "1608402838/actualpower".to_owned(),
            retain: false,
            payload: "1234".to_owned(),
        }))
        .unwrap();
    channels.shutdown.send(()).unwrap();
    channels.to_mqtt.send(ChannelData::Shutdown).unwrap();

    tokio::time::timeout(Duration::from_secs(5), client)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), broker)
        .await
        .unwrap()
        .unwrap();

    let contains = |needle: &[u8]| received.windows(needle.len()).any(|w| w == needle);
    assert!(contains(b"omnik/1608402838/actualpower"));
    assert!(contains(b"omnik/LWT"));
    assert!(contains(b"offline"));
    // DISCONNECT is the last thing on the wire
    assert_eq!(&received[received.len() - 2..], &[0xe0, 0x00]);
}

#[tokio::test]
async fn poll_once_prints_every_sensor() {
    common_setup();

    let server = FakeInverter::start(Factory::response()).await;
    let config = Config::from_yaml(&format!(
        "datasource: inverter\ninverter:\n  host: 127.0.0.1\n  port: {}\n  serial: {}\nsensors: [actualpower, status, incometoday]\n",
        server.port, SERIAL
    ))
    .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&omnik_bridge::poll_once(&config).await.unwrap()).unwrap();

    assert_eq!(json["actualpower"], serde_json::json!(1234));
    assert_eq!(json["status"], serde_json::json!("Online"));
    assert!(json["incometoday"].is_null());
    assert_eq!(json.as_object().unwrap().len(), 3);

    let options = Options {
        config_file: "unused.yaml".to_owned(),
        runtime: None,
        once: true,
    };
    omnik_bridge::run(options, config).await.unwrap();
    assert_eq!(server.connections(), 2);
}
