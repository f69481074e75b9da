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

//! Probe launch protocol.
//!
//! Launcher side:
//! 1. resolve the target and the notary, assemble and verify the transaction
//!    and open the session with the target;
//! 2. sign;
//! 3. send the proposal;
//! 4. receive the target signature;
//! 5. notarize;
//! 6. record the notarized transaction;
//! 7. send it to the target;
//! 8. wait for the target acknowledgement.
//!
//! Once the notary co-signed, the transaction is final: a failure while
//! delivering it to the target or waiting for the acknowledgement is logged
//! and the run still completes with the transaction digest.
//!
//! Target side, started by the first launcher message:
//! 1. receive the proposal;
//! 2. check it: contract, addressing, launcher identity and signature, notary;
//! 3. sign;
//! 4. send the signature;
//! 5. receive the notarized transaction;
//! 6. record it;
//! 7. acknowledge.

use super::{
    protocol::{lost, unexpected, FlowContext, StepKind, StepOutcome},
    session::{Session, SessionPayload},
    FlowResult, TransactionDigest, LAUNCH_PROBE_FLOW,
};
use crate::{
    base::{NotarizedTransaction, SignedTransaction, TransactionSignature, UnsignedTransaction},
    contract,
    db::Db,
    identity,
    ledger::builder,
    notary::NotaryResponse,
    Error, ErrorKind, Result,
};
use serde_json::{Map, Value};

/// Launch parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LaunchProbeParams {
    pub message: String,
    /// Target structured name.
    pub target: String,
    pub restricted_to_peer_class: bool,
}

fn param(map: &Map<String, Value>, keys: &[&str]) -> Result<String> {
    let value = keys
        .iter()
        .find_map(|key| map.get(*key))
        .ok_or_else(|| Error::new_ext(ErrorKind::MissingParameter, keys[0].to_owned()))?;
    Ok(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

impl LaunchProbeParams {
    /// Parse the JSON parameters object.
    /// Values are expected as strings, `planetaryOnly` is accepted in place of
    /// `restrictedToPeerClass`.
    pub fn parse(json: &str) -> Result<Self> {
        let map: Map<String, Value> = serde_json::from_str(json)
            .map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        let message = param(&map, &["message"])?;
        let target = param(&map, &["target"])?;
        let restricted = param(&map, &["restrictedToPeerClass", "planetaryOnly"])?;
        Ok(LaunchProbeParams {
            message,
            target,
            restricted_to_peer_class: restricted.trim().eq_ignore_ascii_case("true"),
        })
    }
}

/// Launcher side variables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LaunchProbe {
    pub params: LaunchProbeParams,
    pub session: Option<Session>,
    pub unsigned: Option<UnsignedTransaction>,
    pub tx: Option<SignedTransaction>,
    pub notarized: Option<NotarizedTransaction>,
    /// Set as soon as the notary co-signed.
    pub digest: Option<TransactionDigest>,
}

impl LaunchProbe {
    pub const STEPS: &'static [StepKind] = &[
        StepKind::Compute,
        StepKind::Sign,
        StepKind::SuspendSend,
        StepKind::SuspendReceive,
        StepKind::AwaitNotary,
        StepKind::Compute,
        StepKind::SuspendSend,
        StepKind::SuspendReceive,
    ];

    pub fn new(params: LaunchProbeParams) -> Self {
        LaunchProbe {
            params,
            session: None,
            unsigned: None,
            tx: None,
            notarized: None,
            digest: None,
        }
    }

    /// Result of a notarized launch.
    pub fn settled(&self) -> Option<FlowResult> {
        self.digest.clone().map(FlowResult::Transaction)
    }

    fn assemble<D: Db>(&mut self, ctx: &FlowContext<'_, D>) -> Result<()> {
        let target = identity::resolve(ctx.identity, &self.params.target)?;
        let notary = ctx
            .identity
            .notary_identities()
            .into_iter()
            .next()
            .ok_or_else(|| Error::new_ext(ErrorKind::NoSuchParty, "no notary available"))?;
        let unsigned = builder::launch(
            &self.params.message,
            self.params.restricted_to_peer_class,
            ctx.me.clone(),
            target.clone(),
            notary,
        )?;
        debug!("[flow] {}: assembled transaction {}", ctx.run_id, unsigned.id());
        let session = Session::open(ctx.run_id, target, LAUNCH_PROBE_FLOW);
        ctx.sessions.open(session.id);
        self.session = Some(session);
        self.unsigned = Some(unsigned);
        Ok(())
    }

    fn collect_signature(&mut self, payload: SessionPayload) -> Result<()> {
        let sig = match payload {
            SessionPayload::Signature(sig) => sig,
            other => return Err(unexpected(&other)),
        };
        let tx = self.tx.take().ok_or_else(|| lost("tx"))?;
        let tx = tx.with_signature(sig)?;
        tx.verify_required_signatures()?;
        self.tx = Some(tx);
        Ok(())
    }

    fn notarize<D: Db>(&mut self, ctx: &FlowContext<'_, D>) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| lost("tx"))?;
        match ctx.notary.notarize(tx) {
            NotaryResponse::Notarized(ntx) => {
                ntx.verify()?;
                info!("[flow] {}: transaction {} notarized", ctx.run_id, ntx.id());
                self.digest = Some(TransactionDigest::new(&ntx));
                self.notarized = Some(ntx);
                Ok(())
            }
            NotaryResponse::Rejected(reason) => Err(Error::new_ext(ErrorKind::NotaryRejected, reason)),
        }
    }

    pub async fn advance<D: Db>(&mut self, ctx: &FlowContext<'_, D>, step: usize) -> Result<StepOutcome> {
        match step {
            0 => self.assemble(ctx)?,
            1 => {
                let unsigned = self.unsigned.clone().ok_or_else(|| lost("unsigned"))?;
                self.tx = Some(unsigned.sign(ctx.keypair));
            }
            2 => {
                let tx = self.tx.clone().ok_or_else(|| lost("tx"))?;
                let session = self.session.as_mut().ok_or_else(|| lost("session"))?;
                ctx.send(session, SessionPayload::Proposal(tx))?;
            }
            3 => {
                let session = self.session.as_mut().ok_or_else(|| lost("session"))?;
                let payload = ctx.receive(session).await?;
                self.collect_signature(payload)?;
            }
            4 => self.notarize(ctx)?,
            5 => {
                let ntx = self.notarized.as_ref().ok_or_else(|| lost("notarized"))?;
                ctx.ledger.commit(ntx)?;
            }
            6 => {
                let ntx = self.notarized.clone().ok_or_else(|| lost("notarized"))?;
                let session = self.session.as_mut().ok_or_else(|| lost("session"))?;
                if let Err(err) = ctx.send(session, SessionPayload::Finality(ntx)) {
                    warn!(
                        "[flow] {}: finality not delivered to {}: {}",
                        ctx.run_id,
                        session.peer,
                        err.to_string_full()
                    );
                    return self.settled().map(StepOutcome::Finished).ok_or_else(|| lost("digest"));
                }
            }
            7 => {
                let session = self.session.as_mut().ok_or_else(|| lost("session"))?;
                match ctx.receive(session).await {
                    Ok(SessionPayload::Ack) => (),
                    Ok(other) => warn!("[flow] {}: {}", ctx.run_id, unexpected(&other).to_string_full()),
                    Err(err) => warn!(
                        "[flow] {}: finality not acknowledged by {}: {}",
                        ctx.run_id,
                        session.peer,
                        err.to_string_full()
                    ),
                }
                return self.settled().map(StepOutcome::Finished).ok_or_else(|| lost("digest"));
            }
            _ => return Err(lost("step")),
        }
        Ok(StepOutcome::Continue)
    }
}

/// Target side variables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LaunchProbeAcceptor {
    pub session: Session,
    pub tx: Option<SignedTransaction>,
    pub signature: Option<TransactionSignature>,
    pub notarized: Option<NotarizedTransaction>,
}

impl LaunchProbeAcceptor {
    pub const STEPS: &'static [StepKind] = &[
        StepKind::SuspendReceive,
        StepKind::Compute,
        StepKind::Sign,
        StepKind::SuspendSend,
        StepKind::SuspendReceive,
        StepKind::Compute,
        StepKind::SuspendSend,
    ];

    pub fn new(session: Session) -> Self {
        LaunchProbeAcceptor {
            session,
            tx: None,
            signature: None,
            notarized: None,
        }
    }

    /// Result of a received notarized launch.
    pub fn settled(&self) -> Option<FlowResult> {
        self.notarized
            .as_ref()
            .map(|ntx| FlowResult::Transaction(TransactionDigest::new(ntx)))
    }

    /// Checks performed before countersigning.
    fn check<D: Db>(&self, ctx: &FlowContext<'_, D>) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| lost("tx"))?;
        contract::verify(&tx.data)?;
        let probe = tx.data.probe_outputs().next().ok_or_else(|| {
            Error::new_ext(ErrorKind::ContractViolation, "This must be a Probe transaction.")
        })?;
        if &probe.target != ctx.me {
            return Err(Error::new_ext(
                ErrorKind::ContractViolation,
                "The probe is not addressed to this party.",
            ));
        }
        if probe.launcher != self.session.peer {
            return Err(Error::new_ext(
                ErrorKind::ContractViolation,
                "The probe was not launched by the counterparty.",
            ));
        }
        let launcher = ctx
            .identity
            .party_from_key(&probe.launcher.owning_key)
            .ok_or_else(|| {
                Error::new_ext(ErrorKind::NoSuchParty, format!("unknown launcher {}", probe.launcher))
            })?;
        if launcher.name != probe.launcher.name {
            return Err(Error::new_ext(
                ErrorKind::ContractViolation,
                "The launcher name does not match its well known identity.",
            ));
        }
        tx.verify_signatures_except(&[ctx.me.owning_key.clone()])?;
        if !ctx.identity.notary_identities().contains(&tx.data.notary) {
            return Err(Error::new_ext(
                ErrorKind::NoSuchParty,
                format!("unknown notary {}", tx.data.notary),
            ));
        }
        Ok(())
    }

    fn receive_finality(&mut self, payload: SessionPayload) -> Result<()> {
        let ntx = match payload {
            SessionPayload::Finality(ntx) => ntx,
            other => return Err(unexpected(&other)),
        };
        let tx = self.tx.as_ref().ok_or_else(|| lost("tx"))?;
        if ntx.id() != tx.id() {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                format!("expected transaction {}, got {}", tx.id(), ntx.id()),
            ));
        }
        ntx.verify()?;
        self.notarized = Some(ntx);
        Ok(())
    }

    pub async fn advance<D: Db>(&mut self, ctx: &FlowContext<'_, D>, step: usize) -> Result<StepOutcome> {
        match step {
            0 => match ctx.receive(&mut self.session).await? {
                SessionPayload::Proposal(tx) => self.tx = Some(tx),
                other => return Err(unexpected(&other)),
            },
            1 => self.check(ctx)?,
            2 => {
                let tx = self.tx.as_ref().ok_or_else(|| lost("tx"))?;
                self.signature = Some(TransactionSignature::create(ctx.keypair, &tx.id()));
            }
            3 => {
                let sig = self.signature.clone().ok_or_else(|| lost("signature"))?;
                ctx.send(&mut self.session, SessionPayload::Signature(sig))?;
            }
            4 => {
                let payload = ctx.receive(&mut self.session).await?;
                self.receive_finality(payload)?;
            }
            5 => {
                let ntx = self.notarized.as_ref().ok_or_else(|| lost("notarized"))?;
                ctx.ledger.commit(ntx)?;
            }
            6 => {
                if let Err(err) = ctx.send(&mut self.session, SessionPayload::Ack) {
                    warn!("[flow] {}: ack not delivered: {}", ctx.run_id, err.to_string_full());
                }
                return self.settled().map(StepOutcome::Finished).ok_or_else(|| lost("notarized"));
            }
            _ => return Err(lost("step")),
        }
        Ok(StepOutcome::Continue)
    }
}
