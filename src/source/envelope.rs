//! Wire shapes of the chat API's `getUpdates` payload.
//!
//! Only the fields the enriched table keeps are modelled; everything else
//! in an update is ignored. Every field is optional so missing structure
//! becomes a null column rather than an error.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;

use crate::error::{DecodeError, InvalidJsonSnafu};

/// Body of one raw updates file: `{"ok": bool, "result": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatesFile {
    #[serde(default)]
    pub ok: Option<bool>,
    pub result: Vec<Value>,
}

impl UpdatesFile {
    /// Decode a raw file body. Fails when the body is not JSON or has no
    /// `result` list.
    pub fn decode(key: &str, body: &Bytes) -> Result<Self, DecodeError> {
        serde_json::from_slice(body).context(InvalidJsonSnafu { key })
    }
}

/// The `message` object of an update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub chat: Option<Chat>,
    #[serde(default)]
    pub text: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub date: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub is_bot: Option<bool>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Chat {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}
