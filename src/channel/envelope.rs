/// Wire envelope for the cross-context message channel
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Envelope direction, serialized under the `type` key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Request expecting a response
    Get,
    /// Response to a `get`
    On,
    /// Fire-and-forget notification
    Post,
}

impl Direction {
    pub fn as_str(&self) -> &str {
        match self {
            Direction::Get => "get",
            Direction::On => "on",
            Direction::Post => "post",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

impl Envelope {
    pub fn request(id: u64, name: &str, data: Value, client_id: &str, provider: &str) -> Self {
        Envelope {
            id,
            direction: Direction::Get,
            name: name.to_string(),
            data,
            client_id: Some(client_id.to_string()),
            provider: Some(provider.to_string()),
        }
    }

    pub fn notify(id: u64, name: &str, data: Value, provider: &str) -> Self {
        Envelope {
            id,
            direction: Direction::Post,
            name: name.to_string(),
            data,
            client_id: None,
            provider: Some(provider.to_string()),
        }
    }

    /// Response echoing the id, name and client id of the request it answers
    pub fn response(
        id: u64,
        name: &str,
        client_id: Option<String>,
        data: Value,
        provider: &str,
    ) -> Self {
        Envelope {
            id,
            direction: Direction::On,
            name: name.to_string(),
            data,
            client_id,
            provider: Some(provider.to_string()),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// True when the envelope carries exactly this provider tag
    pub fn is_from(&self, provider: &str) -> bool {
        self.provider.as_deref() == Some(provider)
    }
}
