// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Security log records in `key="value"` form and a UDP syslog sink.

use crate::dos::learning::LearningState;
use crate::error::Result;
use chrono::{NaiveDateTime, Utc};
use std::fmt;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::debug;

/// Layout of the `date_time` field
pub const DATE_TIME_FORMAT: &str = "%b %d %Y %H:%M:%S";

/// syslog facility local0, severity informational
const SYSLOG_PRIORITY: u8 = 134;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LogParseError {
    #[error("no key=\"value\" pairs found")]
    Empty,

    #[error("unterminated value for key '{0}'")]
    Unterminated(String),
}

/// One security log line. Fields keep their insertion order and their
/// values are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityLogRecord {
    fields: Vec<(String, String)>,
}

impl SecurityLogRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an earlier value
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key.to_string(), value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn vs_name(&self) -> Option<&str> {
        self.get("vs_name")
    }

    pub fn attack_event(&self) -> Option<&str> {
        self.get("attack_event")
    }

    pub fn unit_hostname(&self) -> Option<&str> {
        self.get("unit_hostname")
    }

    pub fn learning_confidence(&self) -> Option<&str> {
        self.get("learning_confidence")
    }

    pub fn reason(&self) -> Option<&str> {
        self.get("reason")
    }

    pub fn source_ip(&self) -> Option<&str> {
        self.get("source_ip")
    }

    pub fn dos_attack_id(&self) -> Option<u64> {
        self.get("dos_attack_id")?.trim().parse().ok()
    }

    pub fn stress_level(&self) -> Option<f64> {
        self.get("stress_level")?.trim().parse().ok()
    }

    pub fn mitigated_by_signatures(&self) -> Option<u64> {
        self.get("mitigated_by_signatures")?.trim().parse().ok()
    }

    pub fn bad_actors(&self) -> Option<u64> {
        self.get("bad_actors")?.trim().parse().ok()
    }

    pub fn date_time(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(self.get("date_time")?, DATE_TIME_FORMAT).ok()
    }

    /// Record announcing the learning state of a replica
    pub fn from_learning_state(state: &LearningState) -> Self {
        SecurityLogRecord::new()
            .with("date_time", state.updated_at.format(DATE_TIME_FORMAT).to_string())
            .with("vs_name", state.protected.clone())
            .with("unit_hostname", state.unit_hostname.clone())
            .with("learning_confidence", state.learning_confidence.as_str())
            .with("bad_actors", state.bad_actors.to_string())
    }
}

impl fmt::Display for SecurityLogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}=\"", key)?;
            for c in value.chars() {
                if c == '"' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{}", c)?;
            }
            f.write_str("\"")?;
        }
        Ok(())
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Tokenise a log line into a record. Values are either quoted
/// (`key="value"`) or bare up to the next comma or whitespace (`key=value`),
/// as in the access log. Text that is not part of a pair, such as a syslog
/// header, is skipped.
pub fn parse_kv_line(line: &str) -> std::result::Result<SecurityLogRecord, LogParseError> {
    let mut record = SecurityLogRecord::new();
    let mut chars = line.char_indices().peekable();
    let mut key_start: Option<usize> = None;

    while let Some((i, c)) = chars.next() {
        if is_key_char(c) {
            key_start.get_or_insert(i);
            continue;
        }

        match key_start.take() {
            Some(start) if c == '=' && !matches!(chars.peek(), Some((_, '"'))) => {
                let mut value = String::new();
                while let Some((_, c)) = chars.next_if(|&(_, c)| c != ',' && !c.is_whitespace()) {
                    value.push(c);
                }
                record.fields.push((line[start..i].to_string(), value));
            }
            Some(start) if c == '=' => {
                let key = &line[start..i];
                chars.next();

                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(LogParseError::Unterminated(key.to_string()));
                }
                record.fields.push((key.to_string(), value));
            }
            _ => {}
        }
    }

    if record.fields.is_empty() {
        return Err(LogParseError::Empty);
    }
    Ok(record)
}

/// Parse every line of `contents` that holds a record
pub fn parse_log(contents: &str) -> Vec<SecurityLogRecord> {
    contents.lines().filter_map(|line| parse_kv_line(line).ok()).collect()
}

/// Sends records as RFC 3164 syslog lines over UDP
pub struct SyslogSink {
    socket: UdpSocket,
    hostname: String,
    tag: String,
}

impl SyslogSink {
    /// Connect to `destination` given as `host:port`
    pub async fn connect(destination: &str, hostname: impl Into<String>) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(destination).await?;
        debug!(destination, "syslog sink connected");
        Ok(Self {
            socket,
            hostname: hostname.into(),
            tag: crate::constants::OPERATOR_NAME.to_string(),
        })
    }

    pub fn format(&self, record: &SecurityLogRecord) -> String {
        format!(
            "<{}>{} {} {}: {}",
            SYSLOG_PRIORITY,
            Utc::now().format("%b %e %H:%M:%S"),
            self.hostname,
            self.tag,
            record
        )
    }

    pub async fn send(&self, record: &SecurityLogRecord) -> Result<()> {
        let line = self.format(record);
        self.socket.send(line.as_bytes()).await?;
        Ok(())
    }
}
