// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use std::time::Duration;

use hsm_common::defs;

#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// The reconnect schedule would spin or never make progress.
    InvalidBackoff(String),
}

/// Key blobs (hex strings, as issued by the HSM) loaded into a session at startup.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Keys {
    #[serde(default)]
    pub pvk: String,
    #[serde(default)]
    pub cvk: String,
    #[serde(default)]
    pub tpk: String,
}

/// Reconnect schedule. The interval starts at `initial_ms`; after every `escalate_every`
/// consecutive dial failures it is multiplied by `factor`, provided no caller is waiting on
/// the send queue, and capped at `max_ms`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Backoff {
    #[serde(default = "Backoff::default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "Backoff::default_max_ms")]
    pub max_ms: u64,
    #[serde(default = "Backoff::default_factor")]
    pub factor: u32,
    #[serde(default = "Backoff::default_escalate_every")]
    pub escalate_every: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionConfig {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub keys: Keys,
    #[serde(default = "SessionConfig::default_sequence_tagging")]
    pub sequence_tagging: bool,
    #[serde(default = "SessionConfig::default_logging")]
    pub logging: bool,
    #[serde(default = "SessionConfig::default_queue_depth")]
    pub queue_depth: usize,
    /// How long a caller waits for its reply. Unset means forever.
    pub request_timeout_ms: Option<u64>,
    /// Socket read / write timeout. Unset means blocking I/O.
    pub io_timeout_ms: Option<u64>,
    #[serde(default)]
    pub backoff: Backoff,
}

impl SessionConfig {
    /// A config with every optional setting at its default.
    pub fn new(ip: &str, port: u16, keys: Keys) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            keys,
            sequence_tagging: Self::default_sequence_tagging(),
            logging: Self::default_logging(),
            queue_depth: Self::default_queue_depth(),
            request_timeout_ms: None,
            io_timeout_ms: None,
            backoff: Backoff::default(),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Socket read / write timeout. Without an explicit one, the request timeout bounds socket
    /// I/O too, so a reply nobody waits for anymore cannot hold the connection forever.
    pub fn io_timeout(&self) -> Option<Duration> {
        // A zero duration is rejected by set_read_timeout(); treat it as "no timeout".
        self.io_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .or_else(|| self.request_timeout())
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.backoff.validate()
    }

    fn default_sequence_tagging() -> bool {
        defs::DEFAULT_SEQUENCE_TAGGING
    }
    fn default_logging() -> bool {
        defs::DEFAULT_LOGGING
    }
    fn default_queue_depth() -> usize {
        defs::DEFAULT_QUEUE_DEPTH
    }
}

impl Backoff {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.initial_ms == 0 {
            return Err(Error::InvalidBackoff("initial_ms must be positive".to_string()));
        }
        if self.max_ms < self.initial_ms {
            return Err(Error::InvalidBackoff(format!(
                "max_ms ({}) is below initial_ms ({})",
                self.max_ms, self.initial_ms
            )));
        }
        if self.factor == 0 {
            return Err(Error::InvalidBackoff("factor must be at least 1".to_string()));
        }
        Ok(())
    }

    fn default_initial_ms() -> u64 {
        defs::DEFAULT_BACKOFF_INITIAL_MS
    }
    fn default_max_ms() -> u64 {
        defs::DEFAULT_BACKOFF_MAX_MS
    }
    fn default_factor() -> u32 {
        defs::DEFAULT_BACKOFF_FACTOR
    }
    fn default_escalate_every() -> usize {
        defs::DEFAULT_BACKOFF_ESCALATE_EVERY
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_ms: Self::default_initial_ms(),
            max_ms: Self::default_max_ms(),
            factor: Self::default_factor(),
            escalate_every: Self::default_escalate_every(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_gets_defaults() {
        let config: SessionConfig = serde_yaml::from_str("ip: 10.0.0.5\nport: 1500\n").unwrap();
        assert_eq!(config.ip, "10.0.0.5");
        assert_eq!(config.port, 1500);
        assert!(config.sequence_tagging);
        assert!(config.logging);
        assert_eq!(config.queue_depth, 64);
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.backoff.initial(), Duration::from_secs(1));
        assert_eq!(config.backoff.max(), Duration::from_secs(60));
        assert_eq!(config.backoff.factor, 5);
        assert_eq!(config.backoff.escalate_every, 10);
        assert!(config.keys.pvk.is_empty());
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
ip: 127.0.0.1
port: 7000
keys:
  pvk: D2305F457EB73E3DDE47B5A247B56C51E23BB763CFB869BA7446
  cvk: D2304AA666DF48D38F8B055FDEA39B7B7F7174CD9027E4520D98
  tpk: D130AECED5596486EB2815126E3B121503F2
sequence_tagging: false
logging: false
queue_depth: 8
request_timeout_ms: 2500
io_timeout_ms: 0
backoff:
  initial_ms: 10
  max_ms: 250
"#;
        let config: SessionConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.sequence_tagging);
        assert!(!config.logging);
        assert_eq!(config.queue_depth, 8);
        assert_eq!(config.keys.tpk, "D130AECED5596486EB2815126E3B121503F2");
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(2500)));
        // No explicit socket timeout: the request timeout stands in.
        assert_eq!(config.io_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.backoff.initial_ms, 10);
        assert_eq!(config.backoff.max_ms, 250);
        assert_eq!(config.backoff.factor, 5);
    }

    #[test]
    fn test_io_timeout() {
        let mut config = SessionConfig::new("127.0.0.1", 1500, Keys::default());
        assert_eq!(config.io_timeout(), None);
        config.request_timeout_ms = Some(300);
        assert_eq!(config.io_timeout(), Some(Duration::from_millis(300)));
        config.io_timeout_ms = Some(50);
        assert_eq!(config.io_timeout(), Some(Duration::from_millis(50)));
        config.request_timeout_ms = Some(0);
        config.io_timeout_ms = Some(0);
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.io_timeout(), None);
    }

    #[test]
    fn test_backoff_validation() {
        assert_eq!(Backoff::default().validate(), Ok(()));

        let spin = Backoff {
            initial_ms: 0,
            ..Backoff::default()
        };
        assert!(matches!(spin.validate(), Err(Error::InvalidBackoff(_))));

        let stuck = Backoff {
            factor: 0,
            ..Backoff::default()
        };
        assert!(matches!(stuck.validate(), Err(Error::InvalidBackoff(_))));

        let inverted = Backoff {
            initial_ms: 500,
            max_ms: 100,
            ..Backoff::default()
        };
        assert!(matches!(inverted.validate(), Err(Error::InvalidBackoff(_))));

        let mut config = SessionConfig::new("127.0.0.1", 1500, Keys::default());
        config.backoff.factor = 0;
        assert!(config.validate().is_err());
    }
}
