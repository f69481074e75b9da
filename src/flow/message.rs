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

//! Requests and responses served by the flow service.
//! Message elements defined as "packed" are structures serialized in
//! MessagePack format.

use crate::{channel, Error};

/// Message types enumeration.
/// Variants are internally tagged with numeric strings.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Exception response used for the full set of messages.
    #[serde(rename = "0")]
    Exception(Error),
    /// Start a flow run.
    #[serde(rename = "1")]
    StartFlowRequest {
        /// Idempotency token.
        token: String,
        /// Protocol name.
        protocol: String,
        /// Protocol parameters, JSON object.
        params: String,
    },
    #[serde(rename = "2")]
    StartFlowResponse { run_id: String, client_id: String },
    /// Status of a flow run.
    #[serde(rename = "3")]
    FlowStatusRequest { run_id: String },
    #[serde(rename = "4")]
    FlowStatusResponse {
        /// One of "RUNNING", "COMPLETED" and "FAILED".
        status: String,
        result: Option<String>,
        error: Option<String>,
    },
    /// Probe messages received by the node.
    /// Answered with a completed `FlowStatusResponse`.
    #[serde(rename = "5")]
    ListProbeMessagesRequest,
    /// Node identity.
    #[serde(rename = "6")]
    IdentityRequest,
    #[serde(rename = "7")]
    IdentityResponse {
        name: String,
        status: String,
        platform_version: u32,
        serial: u64,
    },
    /// Stop the flow service.
    #[serde(rename = "254")]
    Stop,
    /// Packed message serialized using MessagePack.
    #[serde(rename = "255")]
    Packed {
        /// Serialized message bytes.
        #[serde(with = "serde_bytes")]
        buf: Vec<u8>,
    },
}

/// Helper structure to transparently deserialize both single and vector of
/// messages, used for the content of `Packed` messages.
#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
pub enum MultiMessage {
    Simple(Message),
    Sequence(Vec<Message>),
}

/// Flow service request sender alias.
pub type FlowRequestSender = channel::RequestSender<Message, Message>;

/// Flow service request receiver alias.
pub type FlowRequestReceiver = channel::RequestReceiver<Message, Message>;

/// Flow service response sender alias.
pub type FlowResponseSender = channel::Sender<Message>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::serialize::{rmp_deserialize, rmp_serialize},
        ErrorKind,
    };

    const RUN_ID: &str = "0f3b0a8e-3c43-4c4b-9a52-4b4d2f0e2d11";

    const EXCEPTION_HEX: &str = "93a130af73657373696f6e2074696d656f7574aa6e6f206d657373616765";
    const STOP_HEX: &str = "91a3323534";
    const START_FLOW_REQ_HEX: &str =
        "94a131a5746f6b2d31af4c61756e636850726f6265466c6f77a27b7d";
    const FLOW_STATUS_REQ_HEX: &str =
        "92a133d92430663362306138652d336334332d346334622d396135322d346234643266306532643131";
    const IDENTITY_REQ_HEX: &str = "91a136";
    const PACKED_HEX: &str = "92a3323535c42992a133d92430663362306138652d336334332d346334622d396135322d346234643266306532643131";

    fn exception_msg() -> Message {
        Message::Exception(Error::new_ext(ErrorKind::SessionTimeout, "no message"))
    }

    fn start_flow_req_msg() -> Message {
        Message::StartFlowRequest {
            token: "tok-1".to_owned(),
            protocol: "LaunchProbeFlow".to_owned(),
            params: "{}".to_owned(),
        }
    }

    fn flow_status_req_msg() -> Message {
        Message::FlowStatusRequest {
            run_id: RUN_ID.to_owned(),
        }
    }

    #[test]
    fn exception_serialize() {
        let buf = rmp_serialize(&exception_msg()).unwrap();

        assert_eq!(hex::encode(&buf), EXCEPTION_HEX);
    }

    #[test]
    fn exception_deserialize() {
        let buf = hex::decode(EXCEPTION_HEX).unwrap();

        let msg: Message = rmp_deserialize(&buf).unwrap();

        assert_eq!(msg, exception_msg());
    }

    #[test]
    fn stop_serialize() {
        let buf = rmp_serialize(&Message::Stop).unwrap();

        assert_eq!(hex::encode(&buf), STOP_HEX);
    }

    #[test]
    fn start_flow_req_serialize() {
        let buf = rmp_serialize(&start_flow_req_msg()).unwrap();

        assert_eq!(hex::encode(&buf), START_FLOW_REQ_HEX);
    }

    #[test]
    fn start_flow_req_deserialize() {
        let buf = hex::decode(START_FLOW_REQ_HEX).unwrap();

        let msg: Message = rmp_deserialize(&buf).unwrap();

        assert_eq!(msg, start_flow_req_msg());
    }

    #[test]
    fn flow_status_req_deserialize() {
        let buf = hex::decode(FLOW_STATUS_REQ_HEX).unwrap();

        let msg: Message = rmp_deserialize(&buf).unwrap();

        assert_eq!(msg, flow_status_req_msg());
    }

    #[test]
    fn identity_req_serialize() {
        let buf = rmp_serialize(&Message::IdentityRequest).unwrap();

        assert_eq!(hex::encode(&buf), IDENTITY_REQ_HEX);
    }

    #[test]
    fn flow_status_res_with_optionals() {
        let msg = Message::FlowStatusResponse {
            status: "FAILED".to_owned(),
            result: None,
            error: Some("missing parameter: target".to_owned()),
        };

        let buf = rmp_serialize(&msg).unwrap();
        let decoded: Message = rmp_deserialize(&buf).unwrap();

        assert_eq!(decoded, msg);
    }

    #[test]
    fn packed_message_serialize() {
        let inner_buf = rmp_serialize(&flow_status_req_msg()).unwrap();
        let msg = Message::Packed { buf: inner_buf };

        let buf = rmp_serialize(&msg).unwrap();

        assert_eq!(hex::encode(&buf), PACKED_HEX);
    }

    #[test]
    fn multi_message_sequence_deserialize() {
        let org_msgs = vec![start_flow_req_msg(), Message::IdentityRequest, exception_msg()];
        let buf = rmp_serialize(&org_msgs).unwrap();

        let mm: MultiMessage = rmp_deserialize(&buf).unwrap();

        match mm {
            MultiMessage::Sequence(msgs) => assert_eq!(msgs, org_msgs),
            _ => panic!("unexpected"),
        }
    }

    #[test]
    fn multi_message_simple_deserialize() {
        let buf = rmp_serialize(&flow_status_req_msg()).unwrap();

        let mm: MultiMessage = rmp_deserialize(&buf).unwrap();

        match mm {
            MultiMessage::Simple(msg) => assert_eq!(msg, flow_status_req_msg()),
            _ => panic!("unexpected"),
        }
    }
}
