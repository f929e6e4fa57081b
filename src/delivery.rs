// 🚚 Delivery Classifier - route token → channel

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryChannel {
    Mail,
    Carrier,
    Digital,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Mail => "mail",
            DeliveryChannel::Carrier => "carrier",
            DeliveryChannel::Digital => "digital",
        }
    }
}

/// Anything that can put a subscription's route token into a channel
pub trait ChannelClassifier {
    fn classify(&self, route: &str) -> DeliveryChannel;
}

/// Standard route classification
///
/// "MAIL" → mail, "INTERNET" → digital (case-insensitive, exact).
/// Every other token, including "CARRIER", "MOTOR", blanks and unknown
/// routes, is carrier delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryClassifier;

impl DeliveryClassifier {
    pub fn new() -> Self {
        DeliveryClassifier
    }
}

impl ChannelClassifier for DeliveryClassifier {
    fn classify(&self, route: &str) -> DeliveryChannel {
        let route = route.trim();
        if route.eq_ignore_ascii_case("MAIL") {
            DeliveryChannel::Mail
        } else if route.eq_ignore_ascii_case("INTERNET") {
            DeliveryChannel::Digital
        } else {
            DeliveryChannel::Carrier
        }
    }
}
