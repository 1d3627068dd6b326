//! DAB protocol types
//!
//! The wire format is a JSON body per message; correlation metadata (response
//! topic and correlation data) travels in MQTT v5 publish properties.

mod message;
mod response;

pub use message::{
    parse_body, InboundMessage, Message, Notification, NotificationLevel, OutboundMessage,
};
pub use response::{status, InvalidResponse, Reply, Response};

use serde::Deserialize;

/// Quality of Service levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(try_from = "u8")]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery
    AtMostOnce = 0,
    /// At least once delivery
    AtLeastOnce = 1,
    /// Exactly once delivery
    #[default]
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        QoS::from_u8(v).ok_or_else(|| format!("invalid QoS level {}, must be 0, 1, or 2", v))
    }
}

impl From<QoS> for rumqttc::v5::mqttbytes::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
        }
    }
}
