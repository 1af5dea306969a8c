//! Decoding of `measures_debug:` lines.

/// One decoded measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum Measure {
    /// Power in W, voltage in V, current in A.
    Consumption {
        timestamp: f64,
        power: f64,
        voltage: f64,
        current: f64,
    },
    /// RSSI in dBm on a radio channel.
    Radio {
        timestamp: f64,
        channel: u8,
        rssi: i32,
    },
}

impl Measure {
    /// Decode a raw `measures_debug:` line. Unknown payloads yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let payload = line.trim().strip_prefix("measures_debug:")?;
        let fields: Vec<&str> = payload.split_whitespace().collect();
        match fields.as_slice() {
            ["consumption_measure", ts, power, voltage, current] => Some(Measure::Consumption {
                timestamp: ts.parse().ok()?,
                power: power.parse().ok()?,
                voltage: voltage.parse().ok()?,
                current: current.parse().ok()?,
            }),
            ["radio_measure", ts, channel, rssi] => Some(Measure::Radio {
                timestamp: ts.parse().ok()?,
                channel: channel.parse().ok()?,
                rssi: rssi.parse().ok()?,
            }),
            _ => None,
        }
    }
}
