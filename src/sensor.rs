//! Sensor reading for the publisher binary
//!
//! The temperature driver exposes its latest reading as the first line of a
//! device file.

use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// Payload published when the sensor yields nothing
pub const NO_DATA: &str = "No data read";

/// First line of the sensor file, trimmed, or [`NO_DATA`]
///
/// Only one line is read, so streaming character devices do not block.
pub async fn read_reading(path: &Path) -> String {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Sensor unavailable");
            return NO_DATA.to_string();
        }
    };

    let mut line = String::new();
    if let Err(e) = BufReader::new(file).read_line(&mut line).await {
        warn!(path = %path.display(), error = %e, "Sensor read failed");
        return NO_DATA.to_string();
    }

    let reading = line.trim();
    if reading.is_empty() {
        debug!(path = %path.display(), "Sensor returned an empty line");
        return NO_DATA.to_string();
    }
    reading.to_string()
}
