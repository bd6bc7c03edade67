//! AI gateway: suggestions, task enhancement and free-text task parsing
//!
//! Requests go to the trusted proxy first and fall back to calling the
//! provider directly. Replies are loosely shaped JSON and are normalized
//! before anything typed leaves this module.

pub mod fallback;
pub mod gateway;
pub mod normalize;
pub mod prompts;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use gateway::AiGateway;
pub use transport::{AiTransport, DirectTransport, ProxyTransport, TransportChain};

/// What the model is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiAction {
    Suggestions,
    Enhance,
    Parse,
}

impl AiAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AiAction::Suggestions => "suggestions",
            AiAction::Enhance => "enhance",
            AiAction::Parse => "parse",
        }
    }
}

impl FromStr for AiAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suggestions" => Ok(AiAction::Suggestions),
            "enhance" => Ok(AiAction::Enhance),
            "parse" => Ok(AiAction::Parse),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

impl fmt::Display for AiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body sent to the proxy: `{action, payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRequest {
    pub action: AiAction,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AiRequest {
    pub fn new(action: AiAction, payload: serde_json::Value) -> Self {
        Self { action, payload }
    }
}

/// Proxy reply: `{content}` on success, `{error}` otherwise
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProxyResponse {
    pub fn content(content: String) -> Self {
        Self {
            content: Some(content),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            content: None,
            error: Some(error.into()),
        }
    }
}
