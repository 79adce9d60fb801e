//! iotlink-publish - read a sensor and publish the reading over mutual-TLS MQTT
//!
//! Connects, publishes one reading and disconnects. Exits non-zero when the
//! configuration is invalid or the connection cannot be established.

use iotlink::config::{MqttSection, PublisherConfig};
use iotlink::observability::init_default_logging_with;
use iotlink::publish_span;
use iotlink::sensor::read_reading;
use iotlink::session::{LoggingEventSink, PublishRequest, Session};
use iotlink::ConfigError;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument, Level};

/// Publish a sensor reading to an MQTT broker
#[derive(Parser, Debug)]
#[command(name = "iotlink-publish")]
#[command(about = "Read a sensor and publish the value over MQTT")]
#[command(version)]
struct Cli {
    /// Broker endpoint (host, host:port, mqtt://..., mqtts://...)
    #[arg(long, env = "IOTLINK_ENDPOINT")]
    endpoint: Option<String>,

    /// Client certificate (PEM)
    #[arg(long, value_name = "FILE")]
    cert: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long, value_name = "FILE")]
    key: Option<PathBuf>,

    /// Trusted CA bundle (PEM)
    #[arg(long = "ca-file", value_name = "FILE")]
    ca_file: Option<PathBuf>,

    /// Client identifier [default: test-<uuid>]
    #[arg(long)]
    client_id: Option<String>,

    /// Broker port override
    #[arg(long)]
    port: Option<u16>,

    /// Topic to publish to [default: sdk/test/temp]
    #[arg(long)]
    topic: Option<String>,

    /// Sensor device file [default: /dev/tempdriver]
    #[arg(long, value_name = "FILE")]
    sensor: Option<PathBuf>,

    /// QoS level 0, 1 or 2 [default: 1]
    #[arg(long)]
    qos: Option<u8>,

    /// Seconds to wait for each broker answer
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn log_level(&self) -> Option<Level> {
        match self.verbose {
            0 => None,
            1 => Some(Level::DEBUG),
            _ => Some(Level::TRACE),
        }
    }

    /// File config (when given) with command line flags layered on top
    fn publisher_config(&self) -> Result<PublisherConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => PublisherConfig::load_from_file(path)?,
            None => PublisherConfig {
                mqtt: MqttSection {
                    keep_alive_secs: iotlink::transport::mqtt::connection::DEFAULT_KEEP_ALIVE_SECS,
                    ..MqttSection::default()
                },
                publish: Default::default(),
            },
        };

        if let Some(endpoint) = &self.endpoint {
            config.mqtt.endpoint = endpoint.clone();
        }
        if self.cert.is_some() {
            config.mqtt.cert_path = self.cert.clone();
        }
        if self.key.is_some() {
            config.mqtt.key_path = self.key.clone();
        }
        if self.ca_file.is_some() {
            config.mqtt.ca_path = self.ca_file.clone();
        }
        if self.client_id.is_some() {
            config.mqtt.client_id = self.client_id.clone();
        }
        if self.port.is_some() {
            config.mqtt.port = self.port;
        }
        if let Some(topic) = &self.topic {
            config.publish.topic = topic.clone();
        }
        if let Some(sensor) = &self.sensor {
            config.publish.sensor_path = sensor.clone();
        }
        if let Some(qos) = self.qos {
            config.publish.qos = qos;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging_with(cli.log_level());

    info!("Starting iotlink-publish v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&cli).await {
        error!("{}", e);
        process::exit(1);
    }

    info!("Publisher finished");
}

async fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.publisher_config()?;
    let qos = config.qos()?;
    let connection = config.to_connection_config()?;
    let timeout = Duration::from_secs(cli.timeout_secs);

    let client_id = connection.client_id().to_string();
    let session = Session::new(connection, Arc::new(LoggingEventSink::new(&client_id)));

    info!(client_id = %client_id, endpoint = %config.mqtt.endpoint, "Connecting");
    let outcome = session.connect().await?.wait_timeout(timeout).await?;
    info!(
        return_code = outcome.return_code.code(),
        session_present = outcome.session_present,
        "Connected"
    );

    info!(sensor = %config.publish.sensor_path.display(), "Reading from the sensor");
    let reading = read_reading(&config.publish.sensor_path).await;

    let topic = config.publish.topic.clone();
    let request = PublishRequest::new(topic.clone(), reading, qos);
    let published = async {
        let ack = session.publish(request).await?.wait_timeout(timeout).await?;
        info!(packet_id = ?ack.packet_id, "Published successfully");
        Ok::<(), Box<dyn std::error::Error>>(())
    }
    .instrument(publish_span!(topic = %topic, qos = qos.level()))
    .await;

    // A lost publish is reported, the session is still closed cleanly
    if let Err(e) = &published {
        warn!(error = %e, "Publish did not complete");
    }

    session.disconnect().await?.wait_timeout(timeout).await?;
    info!("Disconnected");

    published
}
