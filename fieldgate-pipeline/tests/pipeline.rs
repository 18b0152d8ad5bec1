//! End-to-end tests of the telemetry pipeline with in-memory collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fieldgate_pipeline::{
    BridgeError, BrokerConfig, ForwarderState, Pipeline, QoS, Reading, Result, Source,
    SourceError, TelemetryPacket, Transport,
};

/// Transport keeping every message in memory.
#[derive(Default)]
struct MemoryTransport {
    connected: AtomicBool,
    disconnects: AtomicUsize,
    messages: Mutex<Vec<(String, String)>>,
}

impl MemoryTransport {
    fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    fn payloads(&self, topic: &str) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p)
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, _config: &BrokerConfig) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<()> {
        assert_eq!(qos, QoS::ExactlyOnce);
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), String::from_utf8(payload).unwrap()));
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Channel readings handed out once each, then nothing.
struct Channels {
    cycles: Mutex<VecDeque<Vec<Reading>>>,
}

#[async_trait]
impl Source for Channels {
    fn name(&self) -> &str {
        "channels"
    }

    async fn read(&self) -> std::result::Result<Vec<Reading>, SourceError> {
        Ok(self.cycles.lock().unwrap().pop_front().unwrap_or_default())
    }
}

fn broker() -> BrokerConfig {
    BrokerConfig {
        host: "tcp://tb.example.com:1883".to_string(),
        access_token: "A1_TEST_TOKEN".to_string(),
        client_id: "fieldgate-it".to_string(),
        ..BrokerConfig::default()
    }
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

#[tokio::test]
async fn test_readings_reach_gateway() {
    let transport = Arc::new(MemoryTransport::default());
    let source = Arc::new(Channels {
        cycles: Mutex::new(VecDeque::from([vec![
            Reading::ok("plc01", "voltage", "230.1"),
            Reading::failed("plc01", "current", SourceError::Read("CRC error".to_string())),
            Reading::ok("plc02", "temperature", "21.5"),
        ]])),
    });

    let pipeline = Pipeline::new(
        broker(),
        Duration::from_millis(10),
        transport.clone(),
        source,
    )
    .unwrap();
    pipeline.start().await.unwrap();

    wait_for("two telemetry messages", || {
        transport.payloads("v1/gateway/telemetry").len() == 2
    })
    .await;
    pipeline.stop().await;

    let messages = transport.messages();
    let topics: Vec<&str> = messages.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(
        topics,
        vec![
            "v1/gateway/connect",
            "v1/gateway/telemetry",
            "v1/gateway/connect",
            "v1/gateway/telemetry",
            "v1/gateway/disconnect",
            "v1/gateway/disconnect",
        ]
    );

    let telemetry = transport.payloads("v1/gateway/telemetry");
    assert!(telemetry[0].starts_with(r#"{"plc01":[{"ts":""#));
    assert!(telemetry[0].ends_with(r#"","values":{"voltage":"230.1"}}]}"#));
    assert!(telemetry[1].contains(r#""values":{"temperature":"21.5"}"#));

    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.forwarder().state(), ForwarderState::Stopped);
}

#[tokio::test]
async fn test_extra_producer_shares_queue() {
    let transport = Arc::new(MemoryTransport::default());
    let source = Arc::new(Channels {
        cycles: Mutex::new(VecDeque::new()),
    });

    let pipeline =
        Pipeline::new(broker(), Duration::from_secs(3600), transport.clone(), source).unwrap();
    pipeline.start().await.unwrap();

    let packet = TelemetryPacket::with_timestamp("Sensor1", 1527005515605)
        .unwrap()
        .with_field("Temp", "22.5");
    pipeline.queue().push(packet);

    wait_for("sensor telemetry", || {
        !transport.payloads("v1/gateway/telemetry").is_empty()
    })
    .await;

    assert_eq!(
        transport.payloads("v1/gateway/telemetry"),
        vec![r#"{"Sensor1":[{"ts":"1527005515605","values":{"Temp":"22.5"}}]}"#.to_string()]
    );
    assert!(pipeline.forwarder().tracker().is_announced("Sensor1").await);

    pipeline.stop().await;
    assert!(!pipeline.forwarder().tracker().is_announced("Sensor1").await);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let transport = Arc::new(MemoryTransport::default());
    let source = Arc::new(Channels {
        cycles: Mutex::new(VecDeque::new()),
    });

    let pipeline = Pipeline::new(broker(), Duration::from_millis(10), transport, source).unwrap();
    pipeline.start().await.unwrap();

    assert!(matches!(
        pipeline.start().await,
        Err(BridgeError::AlreadyRunning("Forwarder"))
    ));
    assert!(pipeline.poller().is_running());

    pipeline.stop().await;
}
