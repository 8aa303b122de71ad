//! Commands sent to Redis and helpers to read their replies

use crate::map_redis_error;
use redis::{ToRedisArgs, Value};
use redscope_core::{RedscopeError, Result};

/// A single Redis command with binary-safe arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisCommand {
    name: String,
    args: Vec<Vec<u8>>,
}

impl RedisCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument; anything `redis` can encode is accepted
    pub fn arg<T: ToRedisArgs>(mut self, value: T) -> Self {
        self.args.extend(value.to_redis_args());
        self
    }

    /// Build a command from already tokenized parts (name first)
    pub fn from_parts<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut parts = parts.into_iter();
        let name = parts
            .next()
            .ok_or_else(|| RedscopeError::Command("Empty command".to_string()))?;
        let name = String::from_utf8_lossy(name.as_ref()).into_owned();
        if name.trim().is_empty() {
            return Err(RedscopeError::Command("Empty command".to_string()));
        }

        Ok(Self {
            name,
            args: parts.map(|part| part.as_ref().to_vec()).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn to_cmd(&self) -> redis::Cmd {
        let mut cmd = redis::cmd(&self.name);
        for arg in &self.args {
            cmd.arg(arg.as_slice());
        }
        cmd
    }
}

impl std::fmt::Display for RedisCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name.to_uppercase())?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

/// Build a pipeline out of commands
pub fn to_pipeline(commands: &[RedisCommand]) -> redis::Pipeline {
    let mut pipeline = redis::pipe();
    for command in commands {
        pipeline.add_command(command.to_cmd());
    }
    pipeline
}

/// Turn an inline server error reply into an error
pub fn into_reply(value: Value) -> Result<Value> {
    match value {
        Value::ServerError(err) => {
            let err: redis::RedisError = err.into();
            Err(map_redis_error(err))
        }
        other => Ok(other),
    }
}

/// Read a reply as text
pub fn reply_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::VerbatimString { text, .. } => Some(text.clone()),
        Value::Okay => Some("OK".to_string()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Read a reply as an integer
pub fn reply_to_i64(value: &Value) -> Result<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        other => reply_to_string(other)
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                RedscopeError::Command(format!("Expected integer reply, got {:?}", other))
            }),
    }
}

/// Read a reply as a list of raw byte strings
pub fn reply_to_bytes_list(value: &Value) -> Result<Vec<Vec<u8>>> {
    match value {
        Value::Array(items) | Value::Set(items) => items
            .iter()
            .map(|item| match item {
                Value::BulkString(bytes) => Ok(bytes.clone()),
                Value::SimpleString(s) => Ok(s.clone().into_bytes()),
                other => Err(RedscopeError::Command(format!(
                    "Expected string element, got {:?}",
                    other
                ))),
            })
            .collect(),
        Value::Nil => Ok(Vec::new()),
        other => Err(RedscopeError::Command(format!(
            "Expected array reply, got {:?}",
            other
        ))),
    }
}
