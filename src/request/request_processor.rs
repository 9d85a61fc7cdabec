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

use tracing::{debug, trace};

use crate::lookup::LookupEngine;
use crate::network::RequestFrame;
use crate::store::RecordStore;

use super::{MapName, MapResponse};

pub struct RequestProcessor;

impl RequestProcessor {
    /// Routes one request to the lookup engine. Never fails: unknown maps and
    /// lookup errors both come back as `NotFound`.
    pub async fn process_request<S: RecordStore>(
        request: &RequestFrame,
        engine: &LookupEngine<S>,
    ) -> MapResponse {
        trace!("Processing request: {:?}", request);
        let map = match request.map_name.parse::<MapName>() {
            Ok(map) => map,
            Err(err) => {
                debug!("rejecting request for key {:?}: {}", request.key, err);
                return MapResponse::NotFound;
            }
        };

        match map {
            MapName::Domains => {
                engine.stats().record_domain_query();
                if engine.check_domain(&request.key).await {
                    MapResponse::Found(None)
                } else {
                    MapResponse::NotFound
                }
            }
            MapName::Mailboxes => {
                engine.stats().record_mailbox_query();
                match engine.resolve_mailbox(&request.key).await {
                    Some(path) => MapResponse::Found(Some(path)),
                    None => MapResponse::NotFound,
                }
            }
        }
    }
}
