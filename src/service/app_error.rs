// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("malformed protocol : {0}")]
    MalformedProtocol(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    #[error("tracing setup error: {0}")]
    TracingSetup(String),

    /// marker error
    #[error("incomplete frame")]
    Incomplete,

    /// socketmap errors
    #[error("unknown map: {0}")]
    UnknownMap(String),

    /// store errors
    #[error("store query timed out after {0:?}")]
    StoreTimeout(std::time::Duration),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

impl AppError {
    /// Whether this error came from the record store. These are the failures
    /// the lookup engine counts and never caches.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            AppError::StoreTimeout(_)
                | AppError::StoreUnavailable(_)
                | AppError::MalformedRecord(_)
                | AppError::RocksDb(_)
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::MalformedRecord(value.to_string())
    }
}
