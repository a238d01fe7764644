use std::{fs, net::SocketAddr, path::Path, time::Duration};

use serde::Deserialize;

use crate::error::{Error, Result};


/// file read by the binaries when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// How the server hands out its single serving path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// requesters race for the [`crate::servers::resource_lock::ResourceLock`]
    Contention,
    /// one dispatcher, strict arrival order
    Fifo,
    /// one dispatcher, requesters admitted in rotation
    RoundRobin,
}

impl ServerMode {
    /// parses the name used in the config file
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "contention" => Some(Self::Contention),
            "fifo" => Some(Self::Fifo),
            "round_robin" | "rr" => Some(Self::RoundRobin),
            _ => None,
        }
    }
}

/// Requester side transmission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationPolicy {
    /// plain request/response, no collision handling
    Direct,
    /// transmit with probability `1/n` at slot boundaries
    SlottedAloha,
    /// transmit at once, back off exponentially on collision
    Beb,
    /// probe the server, transmit as [`ArbitrationPolicy::Beb`] when idle
    SensingBeb,
}

impl ArbitrationPolicy {
    /// parses the name used in the config file, or the numeric selector
    /// of the assignment (`0` aloha, `1` beb, `2` sensing)
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "direct" => Some(Self::Direct),
            "slotted_aloha" | "aloha" | "0" => Some(Self::SlottedAloha),
            "beb" | "1" => Some(Self::Beb),
            "sensing_beb" | "sensing" | "2" => Some(Self::SensingBeb),
            _ => None,
        }
    }
}

const fn default_slot_ms() -> u64 {
    100
}

const fn default_mode() -> ServerMode {
    ServerMode::Contention
}

const fn default_arbitration() -> ArbitrationPolicy {
    ArbitrationPolicy::Beb
}

const fn default_max_attempts() -> u32 {
    16
}

const fn default_read_timeout_ms() -> u64 {
    10_000
}

const fn default_turn_timeout_ms() -> u64 {
    2_000
}

fn default_output_prefix() -> String {
    "output".to_owned()
}

const fn default_rogue_burst() -> usize {
    5
}

/// Configuration shared by the server and the clients, read from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// address the server binds and the clients connect to
    pub server_ip: String,
    /// port of the server
    pub server_port: u16,
    /// words per request (K)
    #[serde(rename = "k")]
    pub words_per_request: usize,
    /// words per packet (P)
    #[serde(rename = "p")]
    pub words_per_packet: usize,
    /// number of requesters, also the number of connections the server accepts
    pub num_clients: usize,
    /// corpus path
    pub input_file: String,
    /// slot length in milliseconds (T)
    #[serde(rename = "T", default = "default_slot_ms")]
    pub slot_ms: u64,
    /// server mode
    #[serde(default = "default_mode")]
    pub mode: ServerMode,
    /// client transmission policy
    #[serde(default = "default_arbitration")]
    pub arbitration: ArbitrationPolicy,
    /// colliding attempts tolerated by backoff before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// bound on every socket read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// how long the head of a round-robin rotation may keep its turn
    #[serde(default = "default_turn_timeout_ms")]
    pub turn_timeout_ms: u64,
    /// prefix of the frequency files
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    /// seed of the backoff rng, time based if missing
    #[serde(default)]
    pub seed: Option<u64>,
    /// requesters that pipeline their requests
    #[serde(default)]
    pub rogue_clients: usize,
    /// requests sent back to back by a pipelining requester
    #[serde(default = "default_rogue_burst")]
    pub rogue_burst: usize,
}

impl Config {
    /// parses and validates a JSON document
    ///
    /// # Errors
    /// fails on malformed JSON or invalid values
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// reads, parses and validates a config file
    ///
    /// # Errors
    /// fails if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path: &Path = path.as_ref();
        let text: String = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// checks the invariants the rest of the crate relies on
    ///
    /// # Errors
    /// returns the first violated constraint
    pub fn validate(&self) -> Result<()> {
        let positive: [(&str, bool); 8] = [
            ("k", self.words_per_request > 0),
            ("p", self.words_per_packet > 0),
            ("num_clients", self.num_clients > 0),
            ("T", self.slot_ms > 0),
            ("max_attempts", self.max_attempts > 0),
            ("read_timeout_ms", self.read_timeout_ms > 0),
            ("turn_timeout_ms", self.turn_timeout_ms > 0),
            ("rogue_burst", self.rogue_burst > 0),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, ok)| !ok) {
            return Err(Error::Config(format!("{key} must be greater than zero")));
        }
        if self.rogue_clients > self.num_clients {
            return Err(Error::Config(format!(
                "rogue_clients ({}) exceeds num_clients ({})",
                self.rogue_clients, self.num_clients
            )));
        }
        Ok(())
    }

    /// socket address built from `server_ip` and `server_port`,
    /// `INADDR_ANY` is accepted as an alias of `0.0.0.0`
    ///
    /// # Errors
    /// fails if `server_ip` is not an IP address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: &str = if self.server_ip == "INADDR_ANY" {
            "0.0.0.0"
        } else {
            &self.server_ip
        };
        format!("{ip}:{}", self.server_port)
            .parse()
            .map_err(|_| Error::Config(format!("invalid server_ip {:?}", self.server_ip)))
    }

    /// bound on socket reads
    #[inline]
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// round-robin turn bound
    #[inline]
    #[must_use]
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }
}
