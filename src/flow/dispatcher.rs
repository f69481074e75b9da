// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Flow service component in charge of serving the requests submitted via
//! the service input channel.
//!
//! Requests coming from an external front door are usually submitted as
//! `Packed` messages: the payload is a single MessagePack encoded `Message`
//! or a sequence of them, in anonymous (array) format. A `Packed` request is
//! always answered with a `Packed` response.

use super::{
    engine::FlowEngine,
    message::{Message, MultiMessage},
};
use crate::{
    base::serialize::{rmp_deserialize, rmp_serialize},
    db::Db,
    Error, ErrorKind,
};
use uuid::Uuid;

/// Reported node status.
const NODE_STATUS: &str = "ACTIVE";

/// Platform version advertised to clients.
pub const PLATFORM_VERSION: u32 = 1;

/// Dispatcher context data.
pub(crate) struct Dispatcher<D: Db> {
    engine: FlowEngine<D>,
    serial: u64,
}

impl<D: Db> Clone for Dispatcher<D> {
    fn clone(&self) -> Self {
        Dispatcher {
            engine: self.engine.clone(),
            serial: self.serial,
        }
    }
}

impl<D: Db> Dispatcher<D> {
    pub fn new(engine: FlowEngine<D>, serial: u64) -> Self {
        Dispatcher { engine, serial }
    }

    fn start_flow_handler(&self, token: String, protocol: String, params: String) -> Message {
        match self.engine.start(&protocol, &token, &params) {
            Ok(res) => Message::StartFlowResponse {
                run_id: res.run_id.to_string(),
                client_id: res.client_id,
            },
            Err(err) => Message::Exception(err),
        }
    }

    fn flow_status_handler(&self, run_id: String) -> Message {
        let run_id = match Uuid::parse_str(&run_id) {
            Ok(run_id) => run_id,
            Err(err) => return Message::Exception(Error::new_ext(ErrorKind::MalformedData, err)),
        };
        match self.engine.status_of(&run_id) {
            Ok(status) => Message::FlowStatusResponse {
                status: status.status.to_string(),
                result: status.result_json,
                error: status.error_message,
            },
            Err(err) => Message::Exception(err),
        }
    }

    fn list_probe_messages_handler(&self) -> Message {
        let messages = self.engine.received_messages();
        Message::FlowStatusResponse {
            status: super::RunStatus::Completed.to_string(),
            result: Some(super::FlowResult::Messages(messages).to_json()),
            error: None,
        }
    }

    fn identity_handler(&self) -> Message {
        Message::IdentityResponse {
            name: self.engine.me().name.to_string(),
            status: NODE_STATUS.to_owned(),
            platform_version: PLATFORM_VERSION,
            serial: self.serial,
        }
    }

    fn packed_message_handler(&self, buf: Vec<u8>) -> Option<Message> {
        trace!("RX ({}): {}", buf.len(), hex::encode(&buf));
        const ARRAY_HIGH_NIBBLE: u8 = 0x90;

        // Anonymous serialization format only.
        let tag = buf.first().cloned().unwrap_or_default();
        if (tag & ARRAY_HIGH_NIBBLE) != ARRAY_HIGH_NIBBLE {
            let err = Error::new_ext(
                ErrorKind::MalformedData,
                "expected anonymous serialization format",
            );
            return Some(Message::Exception(err));
        }

        let res = match rmp_deserialize(&buf) {
            Ok(MultiMessage::Simple(req)) => {
                MultiMessage::Simple(self.message_handler(req).unwrap_or(Message::Stop))
            }
            Ok(MultiMessage::Sequence(requests)) => MultiMessage::Sequence(
                requests
                    .into_iter()
                    .filter_map(|req| self.message_handler(req))
                    .collect(),
            ),
            Err(err) => MultiMessage::Simple(Message::Exception(err)),
        };
        let buf = rmp_serialize(&res).unwrap_or_default();
        trace!("TX ({}): {}", buf.len(), hex::encode(&buf));
        Some(Message::Packed { buf })
    }

    pub fn message_handler(&self, req: Message) -> Option<Message> {
        match req {
            Message::StartFlowRequest {
                token,
                protocol,
                params,
            } => Some(self.start_flow_handler(token, protocol, params)),
            Message::FlowStatusRequest { run_id } => Some(self.flow_status_handler(run_id)),
            Message::ListProbeMessagesRequest => Some(self.list_probe_messages_handler()),
            Message::IdentityRequest => Some(self.identity_handler()),
            Message::Packed { buf } => self.packed_message_handler(buf),
            _ => None,
        }
    }
}
