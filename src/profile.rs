//! Monitoring profile: power source, consumption and radio measurement setup.
//!
//! Profiles arrive as JSON documents:
//!
//! ```json
//! {
//!     "profilename": "consumption_radio",
//!     "power": "dc",
//!     "consumption": {"period": 140, "average": 1, "power": true, "voltage": false, "current": false},
//!     "radio": {"mode": "rssi", "channels": [11, 26], "period": 10, "num_per_channel": 1}
//! }
//! ```
//!
//! The consumption `source` is not part of the document. It derives from the
//! power mode and the board alimentation (see [`Profile::from_json`]).

use crate::error::{AppResult, GatewayError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Consumption sampling periods accepted by the control node, in µs.
pub const CONSUMPTION_PERIODS: [u32; 8] = [140, 204, 332, 588, 1100, 2116, 4156, 8244];
/// Consumption averaging counts accepted by the control node.
pub const CONSUMPTION_AVERAGES: [u32; 8] = [1, 4, 16, 64, 128, 256, 512, 1024];
/// Usable 802.15.4 channels.
pub const RADIO_CHANNELS: std::ops::RangeInclusive<u8> = 11..=26;

/// Consumption source when running on battery.
pub const BATTERY_SOURCE: &str = "BATT";

/// Open node power supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    #[default]
    Dc,
    Battery,
}

impl Power {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Power::Dc => "dc",
            Power::Battery => "battery",
        }
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumption measurement configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumption {
    /// `3.3V`, `5V` or `BATT`; filled from the power mode
    #[serde(default)]
    pub source: String,
    /// Sampling period in µs
    pub period: u32,
    /// Samples averaged per measure
    pub average: u32,
    #[serde(default)]
    pub power: bool,
    #[serde(default)]
    pub voltage: bool,
    #[serde(default)]
    pub current: bool,
}

impl Consumption {
    /// True when at least one value is measured.
    pub fn is_enabled(&self) -> bool {
        self.power || self.voltage || self.current
    }
}

/// Radio measurement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RadioMode {
    Rssi,
    Sniffer,
}

impl FromStr for RadioMode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rssi" => Ok(RadioMode::Rssi),
            "sniffer" => Ok(RadioMode::Sniffer),
            other => Err(GatewayError::UnknownRadioMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for RadioMode {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RadioMode> for String {
    fn from(mode: RadioMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for RadioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RadioMode::Rssi => "rssi",
            RadioMode::Sniffer => "sniffer",
        })
    }
}

/// Radio measurement configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Radio {
    pub mode: RadioMode,
    pub channels: Vec<u8>,
    /// Time spent on each channel, in ms
    pub period: u32,
    /// Measures per channel before switching (rssi only)
    #[serde(default)]
    pub num_per_channel: u32,
}

impl Radio {
    /// Channels deduplicated and sorted, comma separated.
    pub fn channels_csv(&self) -> String {
        let mut channels = self.channels.clone();
        channels.sort_unstable();
        channels.dedup();
        channels
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Full monitoring profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub profilename: String,
    pub power: Power,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption: Option<Consumption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radio: Option<Radio>,
}

impl Default for Profile {
    /// DC powered, no measures.
    fn default() -> Self {
        Self {
            profilename: "_default_profile".to_string(),
            power: Power::Dc,
            consumption: None,
            radio: None,
        }
    }
}

impl Profile {
    /// Parse a JSON profile. `alim` is the consumption source on DC power.
    pub fn from_json(json: &str, alim: &str) -> AppResult<Self> {
        let mut profile: Profile = serde_json::from_str(json)?;
        if let Some(consumption) = profile.consumption.as_mut() {
            consumption.source = match profile.power {
                Power::Dc => alim.to_string(),
                Power::Battery => BATTERY_SOURCE.to_string(),
            };
        }
        Ok(profile)
    }

    /// Check the values against what the control node accepts.
    pub fn validate(&self) -> AppResult<()> {
        if let Some(consumption) = &self.consumption {
            if !CONSUMPTION_PERIODS.contains(&consumption.period) {
                return Err(GatewayError::InvalidProfile(format!(
                    "consumption period {} not in {:?}",
                    consumption.period, CONSUMPTION_PERIODS
                )));
            }
            if !CONSUMPTION_AVERAGES.contains(&consumption.average) {
                return Err(GatewayError::InvalidProfile(format!(
                    "consumption average {} not in {:?}",
                    consumption.average, CONSUMPTION_AVERAGES
                )));
            }
        }

        if let Some(radio) = &self.radio {
            if radio.channels.is_empty() {
                return Err(GatewayError::InvalidProfile(
                    "radio channels list is empty".to_string(),
                ));
            }
            if let Some(bad) = radio.channels.iter().find(|&&c| !RADIO_CHANNELS.contains(&c)) {
                return Err(GatewayError::InvalidProfile(format!(
                    "radio channel {} not in {:?}",
                    bad, RADIO_CHANNELS
                )));
            }
            if radio.period == 0 {
                return Err(GatewayError::InvalidProfile(
                    "radio period must be at least 1 ms".to_string(),
                ));
            }
            if radio.num_per_channel > 255 {
                return Err(GatewayError::InvalidProfile(format!(
                    "radio num_per_channel {} above 255",
                    radio.num_per_channel
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "profilename": "full",
        "power": "battery",
        "consumption": {"period": 140, "average": 1, "power": true, "voltage": false, "current": true},
        "radio": {"mode": "rssi", "channels": [26, 11, 15, 11], "period": 10, "num_per_channel": 2}
    }"#;

    #[test]
    fn battery_profile_measures_batt() {
        let profile = Profile::from_json(FULL, "3.3V").unwrap();
        assert_eq!(profile.power, Power::Battery);
        let consumption = profile.consumption.as_ref().unwrap();
        assert_eq!(consumption.source, "BATT");
        assert!(consumption.is_enabled());
        assert_eq!(profile.radio.as_ref().unwrap().channels_csv(), "11,15,26");
        profile.validate().unwrap();
    }

    #[test]
    fn dc_profile_uses_board_alim() {
        let json = r#"{"profilename": "p", "power": "dc",
            "consumption": {"period": 1100, "average": 64, "voltage": true}}"#;
        let profile = Profile::from_json(json, "5V").unwrap();
        assert_eq!(profile.consumption.unwrap().source, "5V");
    }

    #[test]
    fn unknown_radio_mode_fails_fast() {
        let json = r#"{"profilename": "p", "power": "dc",
            "radio": {"mode": "jamming", "channels": [11], "period": 10}}"#;
        let err = Profile::from_json(json, "3.3V").unwrap_err();
        assert!(err.to_string().contains("Unknown radio mode"));

        let err = "jamming".parse::<RadioMode>().unwrap_err();
        assert!(matches!(err, GatewayError::UnknownRadioMode(mode) if mode == "jamming"));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut profile = Profile::from_json(FULL, "3.3V").unwrap();
        if let Some(c) = profile.consumption.as_mut() {
            c.period = 150;
        }
        assert!(matches!(
            profile.validate(),
            Err(GatewayError::InvalidProfile(_))
        ));

        let mut profile = Profile::from_json(FULL, "3.3V").unwrap();
        if let Some(r) = profile.radio.as_mut() {
            r.channels.push(27);
        }
        assert!(profile.validate().is_err());

        let mut profile = Profile::from_json(FULL, "3.3V").unwrap();
        if let Some(r) = profile.radio.as_mut() {
            r.channels.clear();
        }
        assert!(profile.validate().is_err());
    }

    #[test]
    fn default_profile_is_dc_without_measures() {
        let profile = Profile::default();
        assert_eq!(profile.power, Power::Dc);
        assert!(profile.consumption.is_none());
        assert!(profile.radio.is_none());
        profile.validate().unwrap();
    }
}
