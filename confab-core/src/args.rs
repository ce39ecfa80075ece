// ABOUTME: Argument cursor over the context's buffered message tokens.
// ABOUTME: Consumes the `match` cache entry, falling back to a conversation wait when empty.

use anyhow::Result;
use serde_json::Value;

use crate::context::{Context, CACHE_MATCH};
use crate::error::EngineError;

/// How to pull the next argument out of the token buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMode {
    /// Remove and return the first token
    First,
    /// Remove and return the first token that parses as a number
    Numeric,
    /// Join all remaining tokens into one string (buffer is left intact)
    All,
}

impl std::str::FromStr for ArgMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" | "next" => Ok(Self::First),
            "numeric" | "number" => Ok(Self::Numeric),
            "all" | "full" => Ok(Self::All),
            other => Err(EngineError::InvalidMode(other.to_string())),
        }
    }
}

/// Split message text into buffer tokens on whitespace.
///
/// Handlers seed the buffer with this after stripping whatever prefix or
/// command name they matched on.
pub fn split_tokens(text: &str) -> Vec<Value> {
    text.split_whitespace()
        .map(|token| Value::String(token.to_string()))
        .collect()
}

/// Seed a context's token buffer.
pub fn seed(context: &Context, tokens: Vec<Value>) -> Result<(), EngineError> {
    context.set_cache(CACHE_MATCH, Value::Array(tokens))
}

pub(crate) async fn take(context: &Context, mode: ArgMode, prompt: &str) -> Result<Value> {
    let mut buffer: Vec<Value> = match context.get_cache(CACHE_MATCH) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    match mode {
        ArgMode::All => {
            let joined = buffer
                .iter()
                .map(token_text)
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string();
            if joined.is_empty() {
                fallback(context, prompt).await
            } else {
                Ok(Value::String(joined))
            }
        }
        ArgMode::Numeric => match buffer.iter().position(is_numeric) {
            Some(position) => {
                let value = buffer.remove(position);
                context.set_cache(CACHE_MATCH, Value::Array(buffer))?;
                Ok(value)
            }
            None => fallback(context, prompt).await,
        },
        ArgMode::First => {
            if buffer.is_empty() {
                fallback(context, prompt).await
            } else {
                let value = buffer.remove(0);
                context.set_cache(CACHE_MATCH, Value::Array(buffer))?;
                Ok(value)
            }
        }
    }
}

/// Buffer exhausted: ask the conversation for more input and hand the new
/// message text back unmodified.
async fn fallback(context: &Context, prompt: &str) -> Result<Value> {
    let text = context.wait_message(prompt, None, "").await?;
    Ok(Value::String(text))
}

fn is_numeric(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(text) => text.parse::<f64>().is_ok(),
        _ => false,
    }
}

fn token_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
