//! Command and answer token lists exchanged with the control node.

use std::fmt;

/// Space-separated command line; token 0 is the command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    tokens: Vec<String>,
}

impl Command {
    /// Start a command named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tokens: vec![name.into()],
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.tokens.push(arg.to_string());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.tokens.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    /// Command name.
    pub fn name(&self) -> &str {
        &self.tokens[0]
    }

    /// Wire form, newline terminated.
    pub fn encode(&self) -> String {
        let mut line = self.tokens.join(" ");
        line.push('\n');
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

/// Tokens of one answer line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    tokens: Vec<String>,
}

impl Answer {
    /// Split `line` on whitespace.
    pub fn parse(line: &str) -> Self {
        Self {
            tokens: line.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// True iff the answer is exactly `<name> ACK`.
    pub fn is_ack_for(&self, name: &str) -> bool {
        matches!(self.tokens.as_slice(), [cmd, ack] if cmd == name && ack == "ACK")
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

impl<S: AsRef<str>> From<&[S]> for Answer {
    fn from(tokens: &[S]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.as_ref().to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_joins_with_spaces() {
        let cmd = Command::new("config_radio_measure")
            .arg("11,15,17")
            .arg(100)
            .arg(10);
        assert_eq!(cmd.name(), "config_radio_measure");
        assert_eq!(cmd.encode(), "config_radio_measure 11,15,17 100 10\n");
        assert_eq!(cmd.to_string(), "config_radio_measure 11,15,17 100 10");
    }

    #[test]
    fn ack_validation() {
        assert!(Answer::parse("start ACK").is_ack_for("start"));
        assert!(Answer::parse("start ACK\n").is_ack_for("start"));
        assert!(!Answer::parse("start NACK").is_ack_for("start"));
        assert!(!Answer::parse("stop ACK").is_ack_for("start"));
        assert!(!Answer::parse("start ACK extra").is_ack_for("start"));
        assert!(!Answer::parse("start").is_ack_for("start"));
        assert!(!Answer::parse("").is_ack_for("start"));
    }

    #[test]
    fn answer_from_tokens() {
        let answer = Answer::from(["set_time", "ACK"].as_slice());
        assert!(answer.is_ack_for("set_time"));
    }
}
