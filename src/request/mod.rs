//! Socketmap requests and responses.
//!
//! A request names one of the maps served here and a key. The response is
//! `OK <value>` when the key exists and `NOTFOUND ` for everything else,
//! errors included.

use std::fmt;
use std::str::FromStr;

use bytes::BytesMut;

use crate::network::format_response;
use crate::{AppError, AppResult};

mod request_processor;

pub use request_processor::RequestProcessor;

pub const OK_PREFIX: &str = "OK ";
pub const NOT_FOUND: &str = "NOTFOUND ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapName {
    /// domain name -> whether mail for it is accepted
    Domains,
    /// email address -> maildir path
    Mailboxes,
}

impl MapName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MapName::Domains => "domains",
            MapName::Mailboxes => "mailboxes",
        }
    }
}

impl FromStr for MapName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domains" => Ok(MapName::Domains),
            "mailboxes" => Ok(MapName::Mailboxes),
            other => Err(AppError::UnknownMap(other.to_string())),
        }
    }
}

impl fmt::Display for MapName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapResponse {
    /// The key exists; mailbox lookups carry the resolved path.
    Found(Option<String>),
    NotFound,
}

impl MapResponse {
    pub fn text(&self) -> String {
        match self {
            MapResponse::Found(value) => {
                format!("{}{}", OK_PREFIX, value.as_deref().unwrap_or_default())
            }
            MapResponse::NotFound => NOT_FOUND.to_string(),
        }
    }

    pub fn encode(&self) -> BytesMut {
        format_response(&self.text())
    }

    /// Interprets a decoded response payload, the client side of
    /// [`MapResponse::text`].
    pub fn from_payload(payload: &[u8]) -> AppResult<MapResponse> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| AppError::MalformedProtocol(format!("response is not utf-8: {}", e)))?;
        if let Some(value) = text.strip_prefix(OK_PREFIX) {
            let value = (!value.is_empty()).then(|| value.to_string());
            return Ok(MapResponse::Found(value));
        }
        if text.starts_with(NOT_FOUND.trim_end()) {
            return Ok(MapResponse::NotFound);
        }
        Err(AppError::MalformedProtocol(format!(
            "unexpected response {:?}",
            text
        )))
    }
}
