//! Classification of the lines the control node program writes on stderr.

use crate::control_node::message::Answer;

const READY: &str = "cn_serial_ready";
const SERIAL_ERROR: &str = "cn_serial_error:";
const MEASURES: &str = "measures_debug:";

/// One classified line.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkLine {
    /// `config_ack <name> [args]`
    ConfigAck { name: String, args: Vec<String> },
    /// `error <msg>`
    Error(String),
    /// `cn_serial_error: ...`, raw line kept
    SerialError(String),
    /// `measures_debug: ...`, raw line kept
    Measures(String),
    /// `cn_serial_ready`
    Ready,
    /// Empty or whitespace only
    Blank,
    /// Anything else: the answer to the last command
    Answer(Answer),
}

impl LinkLine {
    /// Classify `line` by its first token.
    pub fn parse(line: &str) -> Self {
        let raw = line.trim_end_matches(['\r', '\n']);
        let mut tokens = raw.split_whitespace();
        let Some(first) = tokens.next() else {
            return LinkLine::Blank;
        };

        match first {
            "config_ack" => LinkLine::ConfigAck {
                name: tokens.next().unwrap_or_default().to_string(),
                args: tokens.map(str::to_string).collect(),
            },
            "error" => LinkLine::Error(tokens.collect::<Vec<_>>().join(" ")),
            SERIAL_ERROR => LinkLine::SerialError(raw.to_string()),
            MEASURES => LinkLine::Measures(raw.to_string()),
            READY => LinkLine::Ready,
            _ => LinkLine::Answer(Answer::parse(raw)),
        }
    }

    /// Delay reported by `config_ack set_time <seconds>`, in microseconds.
    pub fn set_time_delay_us(&self) -> Option<i64> {
        match self {
            LinkLine::ConfigAck { name, args } if name == "set_time" => {
                let seconds: f64 = args.first()?.parse().ok()?;
                Some((1_000_000.0 * seconds) as i64)
            }
            _ => None,
        }
    }
}
