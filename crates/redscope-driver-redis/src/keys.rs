//! Key types and cursor-based key scanning
//!
//! - `KeyType` mirrors the values accepted by `SCAN ... TYPE`
//! - `ScanOptions` describes one `SCAN` call
//! - `ScanPage` is the parsed reply: the next cursor and the keys of the batch

use crate::{RedisCommand, reply_to_bytes_list, reply_to_string};
use redis::Value;
use redscope_core::{RedscopeError, Result};
use serde::{Deserialize, Serialize};

/// Redis key types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "list")]
    List,
    #[serde(rename = "set")]
    Set,
    #[serde(rename = "zset")]
    Zset,
    #[serde(rename = "hash")]
    Hash,
    #[serde(rename = "stream")]
    Stream,
    /// RedisJSON document
    #[serde(rename = "ReJSON-RL")]
    Json,
    /// RedisTimeSeries series
    #[serde(rename = "TSDB-TYPE")]
    TimeSeries,
    /// RedisGraph graph
    #[serde(rename = "graphdata")]
    Graph,
}

impl KeyType {
    /// Parse from a `TYPE` command response
    pub fn from_redis_type(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "string" => Some(KeyType::String),
            "list" => Some(KeyType::List),
            "set" => Some(KeyType::Set),
            "zset" => Some(KeyType::Zset),
            "hash" => Some(KeyType::Hash),
            "stream" => Some(KeyType::Stream),
            "rejson-rl" => Some(KeyType::Json),
            "tsdb-type" => Some(KeyType::TimeSeries),
            "graphdata" => Some(KeyType::Graph),
            _ => None,
        }
    }

    /// Get the Redis type string
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::Zset => "zset",
            KeyType::Hash => "hash",
            KeyType::Stream => "stream",
            KeyType::Json => "ReJSON-RL",
            KeyType::TimeSeries => "TSDB-TYPE",
            KeyType::Graph => "graphdata",
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options for one `SCAN` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Pattern to match (default: "*" for all keys)
    pub pattern: String,
    /// Count hint for SCAN (keys per iteration)
    pub count: u64,
    /// Restrict results to one key type
    pub key_type: Option<KeyType>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            pattern: "*".to_string(),
            count: 100,
            key_type: None,
        }
    }
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn with_key_type(mut self, key_type: Option<KeyType>) -> Self {
        self.key_type = key_type;
        self
    }

    /// Build `SCAN cursor MATCH pattern COUNT count [TYPE type]`
    pub fn to_command(&self, cursor: u64) -> RedisCommand {
        let command = RedisCommand::new("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(self.pattern.as_str())
            .arg("COUNT")
            .arg(self.count);

        match self.key_type {
            Some(key_type) => command.arg("TYPE").arg(key_type.as_str()),
            None => command,
        }
    }
}

/// One page of `SCAN` results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call; `0` means the iteration is complete
    pub cursor: u64,
    pub keys: Vec<Vec<u8>>,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.cursor == 0
    }

    /// Parse a `SCAN` reply: `[cursor, [key, ...]]`
    pub fn from_reply(reply: &Value) -> Result<Self> {
        let Value::Array(parts) = reply else {
            return Err(RedscopeError::Command(format!(
                "Unexpected SCAN reply: {:?}",
                reply
            )));
        };

        let [cursor, keys] = parts.as_slice() else {
            return Err(RedscopeError::Command(format!(
                "Unexpected SCAN reply length: {}",
                parts.len()
            )));
        };

        let cursor = reply_to_string(cursor)
            .and_then(|c| c.parse::<u64>().ok())
            .ok_or_else(|| RedscopeError::Command(format!("Invalid SCAN cursor: {:?}", cursor)))?;

        Ok(Self {
            cursor,
            keys: reply_to_bytes_list(keys)?,
        })
    }
}
