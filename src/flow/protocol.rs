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

//! Protocol definitions.
//!
//! A protocol is an explicit state machine: a static list of steps plus the
//! variables accumulated while running them. The pair (step index, variables)
//! is the checkpoint persisted after each completed step.

use super::{
    launch::{LaunchProbe, LaunchProbeAcceptor, LaunchProbeParams},
    list,
    session::{Session, SessionManager, SessionMessage, SessionPayload, Transport},
    FlowConfig, FlowResult, LAUNCH_PROBE_ACCEPTOR, LAUNCH_PROBE_FLOW,
    LIST_VISITED_PROBE_MESSAGES_FLOW,
};
use crate::{
    base::Party,
    crypto::KeyPair,
    db::Db,
    identity::IdentityService,
    ledger::LedgerStore,
    notary::Notary,
    Error, ErrorKind, Result,
};
use std::time::Duration;
use uuid::Uuid;

/// Step kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Local computation.
    Compute,
    /// Send a payload to the counterparty.
    SuspendSend,
    /// Wait for a payload from the counterparty.
    SuspendReceive,
    /// Sign the transaction under construction.
    Sign,
    /// Submit the transaction to the notary.
    AwaitNotary,
}

/// Step execution outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Proceed with the next step.
    Continue,
    /// Protocol completed.
    Finished(FlowResult),
}

/// Run resume point.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Next step to execute.
    pub step: u32,
    /// Protocol variables.
    pub logic: FlowLogic,
}

/// Known protocols.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum FlowLogic {
    LaunchProbe(LaunchProbe),
    LaunchProbeAcceptor(LaunchProbeAcceptor),
    ListVisitedProbeMessages,
}

impl FlowLogic {
    /// Instantiate a client startable protocol.
    pub fn create(protocol: &str, params: &str) -> Result<FlowLogic> {
        match protocol {
            LAUNCH_PROBE_FLOW => {
                let params = LaunchProbeParams::parse(params)?;
                Ok(FlowLogic::LaunchProbe(LaunchProbe::new(params)))
            }
            LIST_VISITED_PROBE_MESSAGES_FLOW => Ok(FlowLogic::ListVisitedProbeMessages),
            _ => Err(Error::new_ext(
                ErrorKind::ResourceNotFound,
                format!("unknown protocol '{}'", protocol),
            )),
        }
    }

    /// Instantiate the protocol serving a session opened by a counterparty.
    pub fn responder(initiating_flow: &str, local_run: Uuid, msg: &SessionMessage) -> Result<FlowLogic> {
        match initiating_flow {
            LAUNCH_PROBE_FLOW => {
                let session = Session::accept(local_run, msg);
                Ok(FlowLogic::LaunchProbeAcceptor(LaunchProbeAcceptor::new(session)))
            }
            _ => Err(Error::new_ext(
                ErrorKind::ResourceNotFound,
                format!("no responder for '{}'", initiating_flow),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FlowLogic::LaunchProbe(_) => LAUNCH_PROBE_FLOW,
            FlowLogic::LaunchProbeAcceptor(_) => LAUNCH_PROBE_ACCEPTOR,
            FlowLogic::ListVisitedProbeMessages => LIST_VISITED_PROBE_MESSAGES_FLOW,
        }
    }

    pub fn steps(&self) -> &'static [StepKind] {
        match self {
            FlowLogic::LaunchProbe(_) => LaunchProbe::STEPS,
            FlowLogic::LaunchProbeAcceptor(_) => LaunchProbeAcceptor::STEPS,
            FlowLogic::ListVisitedProbeMessages => list::STEPS,
        }
    }

    /// Session with the counterparty, once opened.
    pub fn session(&self) -> Option<&Session> {
        match self {
            FlowLogic::LaunchProbe(flow) => flow.session.as_ref(),
            FlowLogic::LaunchProbeAcceptor(flow) => Some(&flow.session),
            FlowLogic::ListVisitedProbeMessages => None,
        }
    }

    /// Result owed to the client whatever happens next: set once the
    /// transaction has been notarized.
    pub fn settled(&self) -> Option<FlowResult> {
        match self {
            FlowLogic::LaunchProbe(flow) => flow.settled(),
            FlowLogic::LaunchProbeAcceptor(flow) => flow.settled(),
            FlowLogic::ListVisitedProbeMessages => None,
        }
    }

    /// Execute one step.
    pub async fn advance<D: Db>(&mut self, ctx: &FlowContext<'_, D>, step: usize) -> Result<StepOutcome> {
        match self {
            FlowLogic::LaunchProbe(flow) => flow.advance(ctx, step).await,
            FlowLogic::LaunchProbeAcceptor(flow) => flow.advance(ctx, step).await,
            FlowLogic::ListVisitedProbeMessages => {
                let messages = list::received_messages(ctx.ledger, ctx.me, ctx.config.page_size);
                Ok(StepOutcome::Finished(FlowResult::Messages(messages)))
            }
        }
    }
}

/// Services available to a running protocol.
pub struct FlowContext<'a, D: Db> {
    pub run_id: Uuid,
    /// Local party.
    pub me: &'a Party,
    /// Local party signing key.
    pub keypair: &'a KeyPair,
    pub identity: &'a dyn IdentityService,
    pub notary: &'a dyn Notary,
    pub sessions: &'a SessionManager,
    pub transport: &'a dyn Transport,
    pub ledger: &'a LedgerStore<D>,
    pub config: &'a FlowConfig,
}

impl<'a, D: Db> FlowContext<'a, D> {
    /// Send a payload over the session.
    pub fn send(&self, session: &mut Session, payload: SessionPayload) -> Result<()> {
        let msg = session.envelope(self.me, payload);
        trace!("[flow] {}: send seq {} on {}", self.run_id, msg.seq, msg.session_id);
        self.transport.deliver(msg)
    }

    /// Wait for a payload over the session.
    pub async fn receive(&self, session: &mut Session) -> Result<SessionPayload> {
        let timeout = Duration::from_millis(self.config.session_timeout_ms);
        self.sessions.receive(session, timeout).await
    }
}

/// Error for a payload not expected by the current step.
pub(crate) fn unexpected(payload: &SessionPayload) -> Error {
    let kind = match payload {
        SessionPayload::Proposal(_) => "proposal",
        SessionPayload::Signature(_) => "signature",
        SessionPayload::Finality(_) => "finality",
        SessionPayload::Ack => "ack",
        SessionPayload::Abort(_) => "abort",
    };
    Error::new_ext(ErrorKind::MalformedData, format!("unexpected {} payload", kind))
}

/// Error for a protocol variable missing from the checkpoint.
pub(crate) fn lost(var: &str) -> Error {
    Error::new_ext(ErrorKind::Other, format!("flow variable '{}' not set", var))
}
