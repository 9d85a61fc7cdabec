use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

pub const DOMAIN_KEY_PREFIX: &str = "domain:";
pub const MAILBOX_KEY_PREFIX: &str = "mailbox:";

/// A hosted domain as written by the administration service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub verified: bool,
}

impl DomainRecord {
    pub fn new(name: impl Into<String>, enabled: bool, verified: bool) -> Self {
        DomainRecord {
            name: name.into(),
            enabled,
            verified,
        }
    }

    /// Mail is only accepted for domains that are both enabled and verified.
    pub fn is_routable(&self) -> bool {
        self.enabled && self.verified
    }

    pub fn store_key(name: &str) -> String {
        format!("{}{}", DOMAIN_KEY_PREFIX, name.to_lowercase())
    }

    pub(crate) fn decode(name: &str, bytes: &[u8]) -> AppResult<Self> {
        let record: DomainRecord = serde_json::from_slice(bytes)?;
        if !record.name.eq_ignore_ascii_case(name) {
            return Err(AppError::MalformedRecord(format!(
                "domain record stored under {} is named {}",
                name, record.name
            )));
        }
        Ok(record)
    }
}

/// A hosted mailbox as written by the administration service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxRecord {
    pub email: String,
    #[serde(default)]
    pub enabled: bool,
}

impl MailboxRecord {
    pub fn new(email: impl Into<String>, enabled: bool) -> Self {
        MailboxRecord {
            email: email.into(),
            enabled,
        }
    }

    pub fn is_deliverable(&self) -> bool {
        self.enabled
    }

    pub fn store_key(email: &str) -> String {
        format!("{}{}", MAILBOX_KEY_PREFIX, email.to_lowercase())
    }

    pub(crate) fn decode(email: &str, bytes: &[u8]) -> AppResult<Self> {
        let record: MailboxRecord = serde_json::from_slice(bytes)?;
        if !record.email.eq_ignore_ascii_case(email) {
            return Err(AppError::MalformedRecord(format!(
                "mailbox record stored under {} has address {}",
                email, record.email
            )));
        }
        Ok(record)
    }
}
