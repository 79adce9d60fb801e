//! Publish request and acknowledgement value types

use crate::error::PublishError;
use bytes::Bytes;

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityOfService {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QualityOfService {
    /// Map a numeric QoS level (0, 1, 2)
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QualityOfService::AtMostOnce),
            1 => Some(QualityOfService::AtLeastOnce),
            2 => Some(QualityOfService::ExactlyOnce),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            QualityOfService::AtMostOnce => 0,
            QualityOfService::AtLeastOnce => 1,
            QualityOfService::ExactlyOnce => 2,
        }
    }

    /// Whether the broker acknowledges publishes at this level
    pub fn is_acknowledged(self) -> bool {
        !matches!(self, QualityOfService::AtMostOnce)
    }
}

impl From<QualityOfService> for rumqttc::QoS {
    fn from(qos: QualityOfService) -> Self {
        match qos {
            QualityOfService::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QualityOfService::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QualityOfService::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// A single outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QualityOfService,
    pub retain: bool,
}

impl PublishRequest {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QualityOfService) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
        }
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    /// Publish topics must be non-empty and free of wildcards
    pub fn validate(&self) -> Result<(), PublishError> {
        if self.topic.is_empty() {
            return Err(PublishError::InvalidTopic(
                "topic must not be empty".to_string(),
            ));
        }
        if self.topic.contains(['+', '#']) {
            return Err(PublishError::InvalidTopic(format!(
                "wildcards are not allowed in publish topic '{}'",
                self.topic
            )));
        }
        if self.topic.contains('\0') {
            return Err(PublishError::InvalidTopic(
                "topic must not contain NUL".to_string(),
            ));
        }
        Ok(())
    }
}

/// Broker acknowledgement of one publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// Packet identifier; `None` for QoS 0, which has no broker round-trip
    pub packet_id: Option<u16>,
    pub qos: QualityOfService,
}

impl PublishAck {
    /// Local completion for QoS 0 hand-offs
    pub fn synthetic() -> Self {
        Self {
            packet_id: None,
            qos: QualityOfService::AtMostOnce,
        }
    }

    pub fn acknowledged(packet_id: u16, qos: QualityOfService) -> Self {
        Self {
            packet_id: Some(packet_id),
            qos,
        }
    }
}
