//! Sample publisher for exercising a running bridge
//!
//! Publishes position reports for a drone flying a circle, one every `--interval`
//! seconds, or a single literal payload.
//!
//! ## Usage
//!
//! ```bash
//! # Six circling position reports, two seconds apart
//! publish-sample --topic test/topic
//!
//! # Keep flying until Ctrl+C
//! publish-sample --topic test/topic --count 0
//!
//! # One literal payload (does not have to be JSON)
//! publish-sample --topic test/topic --payload 'not-json'
//! ```

use clap::Parser;
use mqtt_http_bridge::config::parse_broker_address;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use std::f64::consts::PI;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

const CENTER_LAT: f64 = 13.7563;
const CENTER_LNG: f64 = 100.5018;
const RADIUS: f64 = 0.002;
const ANGLE_INCREMENT: f64 = 0.3;

#[derive(Parser)]
#[command(
    name = "publish-sample",
    about = "Publish sample drone position reports to an MQTT topic"
)]
struct Args {
    /// MQTT broker host, or an `mqtt://host:port` URL whose port wins over `--port`
    #[arg(long, default_value = "localhost", env = "MQTT_BROKER")]
    host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Topic to publish to
    #[arg(long, default_value = "test/topic", env = "MQTT_TOPIC")]
    topic: String,

    /// QoS level (0, 1 or 2)
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    qos: u8,

    /// Seconds between position reports
    #[arg(long, default_value_t = 2)]
    interval: u64,

    /// Number of reports to send (0 = until Ctrl+C)
    #[arg(long, default_value_t = 6)]
    count: u32,

    /// Publish this payload once instead of position reports
    #[arg(long)]
    payload: Option<String>,
}

/// Position on the circle for `angle` radians
fn circle_position(angle: f64) -> (f64, f64) {
    (
        CENTER_LAT + RADIUS * angle.sin(),
        CENTER_LNG + RADIUS * angle.cos(),
    )
}

/// Position report for the drone at `angle` radians
fn position_report(angle: f64) -> Value {
    let (lat, lng) = circle_position(angle);
    json!({
        "codeName": "DRONE-001",
        "groupId": 1,
        "type": "drone",
        "objective": "surveillance",
        "details": {
            "color": "blue",
            "size": 1.5,
            "speed": 25.0
        },
        "status": {
            "acc noising": false,
            "ang noising": false,
            "mag noising": false,
            "gps spoofing": false,
            "target": "zone-a",
            "mission": "recon"
        },
        "location": {
            "lat": lat,
            "lng": lng,
            "alt": 100
        },
        "position": {
            "row": 0,
            "pitch": 5,
            "yaw": angle * 180.0 / PI
        }
    })
}

fn to_qos(level: u8) -> QoS {
    match level {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

struct SamplePublisher {
    client: AsyncClient,
    event_loop_handle: tokio::task::JoinHandle<()>,
}

impl SamplePublisher {
    async fn connect(host: &str, port: u16) -> Result<Self, Box<dyn std::error::Error>> {
        let client_id = format!("publish_sample_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(60));

        let (client, mut event_loop) = AsyncClient::new(options, 10);
        let (connected_tx, connected_rx) = oneshot::channel();

        let event_loop_handle = tokio::spawn(async move {
            let mut connected_tx = Some(connected_tx);
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        if let Some(tx) = connected_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        eprintln!("MQTT event loop stopped: {e}");
                        break;
                    }
                }
            }
        });

        println!("Connecting to MQTT broker {host}:{port}...");
        match timeout(Duration::from_secs(10), connected_rx).await {
            Ok(Ok(())) => println!("✅ Connected"),
            _ => {
                event_loop_handle.abort();
                return Err(format!("could not connect to {host}:{port}").into());
            }
        }

        Ok(Self {
            client,
            event_loop_handle,
        })
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: Vec<u8>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.client.publish(topic, qos, false, payload).await?;
        Ok(())
    }

    async fn close(self) {
        // Let queued publishes reach the broker before DISCONNECT
        sleep(Duration::from_millis(500)).await;
        let _ = self.client.disconnect().await;
        let _ = timeout(Duration::from_secs(2), self.event_loop_handle).await;
    }
}

async fn fly(
    publisher: &SamplePublisher,
    args: &Args,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = to_qos(args.qos);
    let mut angle = 0.0_f64;
    let mut sent = 0u32;

    println!("🛩️  DRONE-001 flying in a circle, publishing to {}", args.topic);
    loop {
        let report = position_report(angle);
        publisher
            .publish(&args.topic, qos, serde_json::to_vec(&report)?)
            .await?;
        sent += 1;
        println!(
            "📤 #{sent} lat: {:.6}, lng: {:.6}",
            report["location"]["lat"].as_f64().unwrap_or_default(),
            report["location"]["lng"].as_f64().unwrap_or_default()
        );

        if args.count != 0 && sent >= args.count {
            break;
        }
        angle += ANGLE_INCREMENT;

        tokio::select! {
            _ = sleep(Duration::from_secs(args.interval)) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted");
                break;
            }
        }
    }

    println!("✓ Sent {sent} position report(s)");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let (host, url_port) = parse_broker_address(&args.host)?;
    let publisher = SamplePublisher::connect(&host, url_port.unwrap_or(args.port)).await?;

    let result = match &args.payload {
        Some(payload) => {
            println!("📤 Publishing literal payload to {}", args.topic);
            publisher
                .publish(&args.topic, to_qos(args.qos), payload.clone().into_bytes())
                .await
        }
        None => fly(&publisher, &args).await,
    };

    publisher.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circle_starts_east_of_center() {
        let (lat, lng) = circle_position(0.0);
        assert!((lat - CENTER_LAT).abs() < 1e-12);
        assert!((lng - (CENTER_LNG + RADIUS)).abs() < 1e-12);
    }

    #[test]
    fn test_position_report_shape() {
        let report = position_report(PI / 2.0);
        assert_eq!(report["codeName"], "DRONE-001");
        assert_eq!(report["location"]["alt"], 100);
        assert!((report["position"]["yaw"].as_f64().unwrap() - 90.0).abs() < 1e-9);
        assert!((report["location"]["lat"].as_f64().unwrap() - (CENTER_LAT + RADIUS)).abs() < 1e-12);
    }

    #[test]
    fn test_broker_url_in_host_argument() {
        let args = Args::parse_from([
            "publish-sample",
            "--host",
            "mqtt://broker.hivemq.com:1884",
            "--port",
            "1883",
        ]);
        let (host, url_port) = parse_broker_address(&args.host).unwrap();
        assert_eq!(host, "broker.hivemq.com");
        assert_eq!(url_port.unwrap_or(args.port), 1884);
    }

    #[test]
    fn test_to_qos() {
        assert_eq!(to_qos(0), QoS::AtMostOnce);
        assert_eq!(to_qos(1), QoS::AtLeastOnce);
        assert_eq!(to_qos(2), QoS::ExactlyOnce);
    }
}
