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

//! Flow execution.
//!
//! A flow run executes a protocol, an ordered list of steps, to completion.
//! After each step the run is checkpointed into the party store, so that a
//! node restart resumes every running flow from its last completed step.
//! Runs are keyed by an idempotency token: starting twice with the same token
//! yields the same run.

mod dispatcher;
pub mod engine;
pub mod launch;
pub mod list;
pub mod message;
pub mod protocol;
pub mod service;
pub mod session;
mod worker;

pub use engine::{FlowEngine, FlowStatus, StartResponse};
pub use message::Message;
pub use protocol::{Checkpoint, FlowContext, FlowLogic, StepKind, StepOutcome};
pub use service::FlowService;
pub use session::{LocalNetwork, Session, SessionMessage, SessionPayload, Transport};

use crate::{base::NotarizedTransaction, Error};
use std::fmt::Display;
use uuid::Uuid;

/// Launcher side of the probe launch.
pub const LAUNCH_PROBE_FLOW: &str = "LaunchProbeFlow";
/// Target side of the probe launch, started by the launcher messages.
pub const LAUNCH_PROBE_ACCEPTOR: &str = "LaunchProbeFlowAcceptor";
/// Received messages listing.
pub const LIST_VISITED_PROBE_MESSAGES_FLOW: &str = "ListVisitedProbeMessagesFlow";

/// Flow engine configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FlowConfig {
    /// Max time a run waits for a counterparty message.
    pub session_timeout_ms: u64,
    /// Page size used by ledger queries.
    pub page_size: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            session_timeout_ms: 30_000,
            page_size: 100,
        }
    }
}

/// Run status.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        };
        write!(f, "{}", status)
    }
}

/// Summary of a finalized transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDigest {
    /// Transaction identifier.
    pub tx_id: String,
    /// JSON representation of the output records.
    pub output_states: Vec<String>,
    /// Fingerprints of the signers, notary included.
    pub signatures: Vec<String>,
}

impl TransactionDigest {
    pub fn new(tx: &NotarizedTransaction) -> Self {
        TransactionDigest {
            tx_id: tx.id().to_string(),
            output_states: tx.tx.data.probe_outputs().map(|p| p.to_json()).collect(),
            signatures: tx.signatures().map(|sig| sig.by.to_fingerprint()).collect(),
        }
    }
}

/// Result of a completed run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum FlowResult {
    Transaction(TransactionDigest),
    Messages(Vec<String>),
}

impl FlowResult {
    pub fn to_json(&self) -> String {
        let res = match self {
            FlowResult::Transaction(digest) => serde_json::to_string(digest),
            FlowResult::Messages(messages) => serde_json::to_string(messages),
        };
        res.unwrap_or_default()
    }
}

/// Flow run record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FlowRun {
    pub run_id: Uuid,
    /// Idempotency token.
    pub token: String,
    /// Protocol name.
    pub protocol: String,
    pub status: RunStatus,
    pub result: Option<FlowResult>,
    pub error: Option<Error>,
    /// Resume point, absent for runs failed at creation.
    pub checkpoint: Option<Checkpoint>,
}

impl FlowRun {
    /// New running flow, positioned at the first step.
    pub fn new(run_id: Uuid, token: &str, protocol: &str, logic: FlowLogic) -> Self {
        FlowRun {
            run_id,
            token: token.to_owned(),
            protocol: protocol.to_owned(),
            status: RunStatus::Running,
            result: None,
            error: None,
            checkpoint: Some(Checkpoint { step: 0, logic }),
        }
    }

    /// Flow refused before running any step.
    pub fn failed(run_id: Uuid, token: &str, protocol: &str, error: Error) -> Self {
        FlowRun {
            run_id,
            token: token.to_owned(),
            protocol: protocol.to_owned(),
            status: RunStatus::Failed,
            result: None,
            error: Some(error),
            checkpoint: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::{base::schema::tests::create_test_notarized_tx, ErrorKind};

    pub fn create_test_run(token: &str) -> FlowRun {
        FlowRun::new(
            Uuid::new_v4(),
            token,
            LIST_VISITED_PROBE_MESSAGES_FLOW,
            FlowLogic::ListVisitedProbeMessages,
        )
    }

    #[test]
    fn new_run_is_running() {
        let run = create_test_run("t");

        assert_eq!(run.status, RunStatus::Running);
        assert!(!run.is_terminal());
        assert_eq!(run.checkpoint.unwrap().step, 0);
    }

    #[test]
    fn failed_run_keeps_error() {
        let err = Error::new_ext(ErrorKind::MissingParameter, "target");

        let run = FlowRun::failed(Uuid::new_v4(), "t", LAUNCH_PROBE_FLOW, err.clone());

        assert!(run.is_terminal());
        assert_eq!(run.error, Some(err));
        assert!(run.checkpoint.is_none());
    }

    #[test]
    fn status_strings() {
        assert_eq!(RunStatus::Running.to_string(), "RUNNING");
        assert_eq!(RunStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(RunStatus::Failed.to_string(), "FAILED");
        assert_eq!(serde_json::to_string(&RunStatus::Failed).unwrap(), "\"FAILED\"");
    }

    #[test]
    fn digest_json() {
        let tx = create_test_notarized_tx();

        let json = FlowResult::Transaction(TransactionDigest::new(&tx)).to_json();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["txId"], tx.id().to_string());
        assert_eq!(value["outputStates"].as_array().unwrap().len(), 1);
        assert_eq!(value["signatures"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn messages_json() {
        let res = FlowResult::Messages(vec!["From: a - Message: b".to_owned()]);

        assert_eq!(res.to_json(), r#"["From: a - Message: b"]"#);
    }

    #[test]
    fn run_survives_checkpoint_encoding() {
        let err = Error::new_ext(ErrorKind::ResourceNotFound, "Unknown");
        let mut run = FlowRun::failed(Uuid::new_v4(), "t", "Unknown", err);
        run.result = Some(FlowResult::Messages(vec!["m".to_owned()]));

        let buf = crate::base::serialize::rmp_serialize(&run).unwrap();
        let decoded: FlowRun = crate::base::serialize::rmp_deserialize(&buf).unwrap();

        assert_eq!(decoded, run);
    }
}
