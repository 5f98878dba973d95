//! The side effects of an emergency: an SMS with the last known location,
//! then a phone call to the configured contact.

use tracing::{info, warn};

use crate::InteractionError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Platform messaging and telephony. Implementations may block.
pub trait Telephony: Send + Sync {
    fn last_known_location(&self) -> Option<GeoPoint>;
    fn send_sms(&self, to: &str, body: &str) -> anyhow::Result<()>;
    fn call(&self, to: &str) -> anyhow::Result<()>;
}

pub fn location_message(loc: Option<GeoPoint>) -> String {
    match loc {
        Some(p) => format!("EMERGENCY! My location: https://maps.google.com/?q={},{}", p.lat, p.lon),
        None => "EMERGENCY! My location: unavailable".to_string(),
    }
}

/// SMS failure is logged and the call is still attempted. A failed call is
/// the only error, so the caller can reset and let the user try again.
pub fn perform(telephony: &dyn Telephony, contact: &str) -> Result<(), InteractionError> {
    let body = location_message(telephony.last_known_location());
    match telephony.send_sms(contact, &body) {
        Ok(()) => info!("emergency: sms sent to {}", contact),
        Err(e) => warn!("emergency: sms failed: {:#}", e),
    }
    telephony
        .call(contact)
        .map_err(|e| InteractionError::EmergencyAction(format!("{e:#}")))?;
    info!("emergency: calling {}", contact);
    Ok(())
}
