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

//! Flow execution engine.
//!
//! Runs are stepped by async tasks, one task per run at a time: a run id is
//! claimed in the active set before stepping and released when the task
//! stops. A run failure is recorded into the run and never escapes the
//! engine.

use super::{
    list,
    protocol::{FlowContext, FlowLogic, StepOutcome},
    session::{Session, SessionManager, SessionMessage, SessionPayload, Transport},
    FlowConfig, FlowResult, FlowRun, RunStatus, LAUNCH_PROBE_ACCEPTOR,
};
use crate::{
    base::{Mutex, Party, RwLock},
    channel::Receiver,
    config::NodeConfig,
    crypto::KeyPair,
    db::Db,
    identity::IdentityService,
    ledger::LedgerStore,
    notary::Notary,
    Error, ErrorKind, Result,
};
use async_std::task::{self, JoinHandle};
use std::{collections::HashSet, sync::Arc};
use uuid::Uuid;

/// Start request outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct StartResponse {
    pub run_id: Uuid,
    /// Client idempotency token.
    pub client_id: String,
}

/// Run status report.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowStatus {
    pub status: RunStatus,
    pub result_json: Option<String>,
    pub error_message: Option<String>,
}

struct EngineInner<D: Db> {
    me: Party,
    keypair: KeyPair,
    config: FlowConfig,
    db: Arc<RwLock<D>>,
    ledger: LedgerStore<D>,
    identity: Arc<dyn IdentityService>,
    notary: Arc<dyn Notary>,
    transport: Arc<dyn Transport>,
    sessions: SessionManager,
    /// Runs currently stepped by a task.
    active: Mutex<HashSet<Uuid>>,
}

/// Flow engine handle.
pub struct FlowEngine<D: Db> {
    inner: Arc<EngineInner<D>>,
}

impl<D: Db> Clone for FlowEngine<D> {
    fn clone(&self) -> Self {
        FlowEngine {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Db> FlowEngine<D> {
    pub fn new(
        me: Party,
        keypair: KeyPair,
        config: FlowConfig,
        db: Arc<RwLock<D>>,
        identity: Arc<dyn IdentityService>,
        notary: Arc<dyn Notary>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let ledger = LedgerStore::new(db.clone());
        let inner = EngineInner {
            me,
            keypair,
            config,
            db,
            ledger,
            identity,
            notary,
            transport,
            sessions: SessionManager::new(),
            active: Mutex::new(HashSet::new()),
        };
        FlowEngine {
            inner: Arc::new(inner),
        }
    }

    /// Engine of the node described by `config`.
    /// The local party is the configured legal name owning `keypair`.
    pub fn from_config(
        config: &NodeConfig,
        keypair: KeyPair,
        db: Arc<RwLock<D>>,
        identity: Arc<dyn IdentityService>,
        notary: Arc<dyn Notary>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let me = Party::new(config.legal_name()?, keypair.public_key());
        Ok(Self::new(
            me,
            keypair,
            config.flow_config(),
            db,
            identity,
            notary,
            transport,
        ))
    }

    /// Local party.
    pub fn me(&self) -> &Party {
        &self.inner.me
    }

    pub fn config(&self) -> &FlowConfig {
        &self.inner.config
    }

    /// Local ledger.
    pub fn ledger(&self) -> LedgerStore<D> {
        self.inner.ledger.clone()
    }

    /// Number of sessions served by running flows.
    pub fn open_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Get a shared reference to the database.
    pub fn db_arc(&self) -> Arc<RwLock<D>> {
        self.inner.db.clone()
    }

    /// Atomically lookup the token or create a new run.
    /// Returns the run and whether it has been created by this call.
    fn create_run<F>(&self, token: &str, protocol: &str, build: F) -> Result<(FlowRun, bool)>
    where
        F: FnOnce(Uuid) -> Result<FlowLogic>,
    {
        let mut db = self.inner.db.write();
        if let Some(run_id) = db.load_run_id(token) {
            return match db.load_run(&run_id) {
                Some(run) => Ok((run, false)),
                None => Err(Error::new_ext(
                    ErrorKind::DatabaseFault,
                    format!("dangling token {}", token),
                )),
            };
        }
        let run_id = Uuid::new_v4();
        let run = match build(run_id) {
            Ok(logic) => FlowRun::new(run_id, token, protocol, logic),
            Err(err) => {
                warn!("[flow] {}: refused {}: {}", run_id, protocol, err.to_string_full());
                FlowRun::failed(run_id, token, protocol, err)
            }
        };
        db.store_run(&run)?;
        info!("[flow] {}: created {} ({})", run_id, protocol, run.status);
        Ok((run, true))
    }

    /// Start a protocol.
    /// A token already bound to a run returns that run, whatever its state.
    pub fn start(&self, protocol: &str, token: &str, params: &str) -> Result<StartResponse> {
        let (run, created) = self.create_run(token, protocol, |_| FlowLogic::create(protocol, params))?;
        if created {
            if run.status == RunStatus::Running {
                self.spawn(run.run_id);
            }
        } else {
            debug!("[flow] token '{}' already bound to {}", token, run.run_id);
        }
        Ok(StartResponse {
            run_id: run.run_id,
            client_id: token.to_owned(),
        })
    }

    /// Flow run record.
    pub fn run(&self, run_id: &Uuid) -> Option<FlowRun> {
        self.inner.db.read().load_run(run_id)
    }

    /// Latest checkpointed status of a run.
    pub fn status_of(&self, run_id: &Uuid) -> Result<FlowStatus> {
        let run = self
            .run(run_id)
            .ok_or_else(|| Error::new_ext(ErrorKind::ResourceNotFound, run_id.to_string()))?;
        Ok(FlowStatus {
            status: run.status,
            result_json: run.result.as_ref().map(FlowResult::to_json),
            error_message: run.error.as_ref().map(Error::to_string_full),
        })
    }

    /// Records received by the local party, without starting a run.
    pub fn received_messages(&self) -> Vec<String> {
        list::received_messages(&self.inner.ledger, &self.inner.me, self.inner.config.page_size)
    }

    /// Route an incoming session envelope.
    /// The first envelope of a session opened by a counterparty starts the
    /// responder run. Once the run terminated its session is closed, a late
    /// envelope finds the run again through the session token and is dropped.
    pub fn handle_session_message(&self, msg: SessionMessage) {
        let sessions = &self.inner.sessions;
        let session_id = msg.session_id;
        let initiating_flow = match msg.initiating_flow.clone() {
            Some(flow) if !sessions.is_open(&session_id) => flow,
            _ => {
                if let Err(err) = sessions.dispatch(msg) {
                    debug!("[flow] {}: late message dropped: {}", session_id, err.to_string_full());
                }
                return;
            }
        };

        sessions.open(session_id);
        let first = msg.clone();
        if let Err(err) = sessions.dispatch(msg) {
            warn!("[flow] {}: {}", session_id, err.to_string_full());
        }
        let token = format!("session-{}", session_id);
        let res = self.create_run(&token, LAUNCH_PROBE_ACCEPTOR, |run_id| {
            FlowLogic::responder(&initiating_flow, run_id, &first)
        });
        match res {
            Ok((run, _)) if run.status == RunStatus::Running => self.spawn(run.run_id),
            Ok((run, _)) => {
                sessions.close(&session_id);
                if let Some(err) = run.error {
                    let mut session = Session::accept(run.run_id, &first);
                    let abort = session.envelope(&self.inner.me, SessionPayload::Abort(err));
                    if let Err(err) = self.inner.transport.deliver(abort) {
                        debug!("[flow] {}: abort not delivered: {}", session_id, err);
                    }
                }
            }
            Err(err) => error!("[flow] {}: responder not created: {}", session_id, err.to_string_full()),
        }
    }

    /// Feed the engine with the envelopes addressed to the local party.
    pub fn listen(&self, rx_chan: Receiver<SessionMessage>) -> JoinHandle<()> {
        let engine = self.clone();
        task::spawn(async move {
            while let Ok(msg) = rx_chan.recv().await {
                engine.handle_session_message(msg);
            }
            debug!("[flow] session listener stopped");
        })
    }

    /// Resume all the running flows from their last checkpoint.
    /// Returns the number of resumed runs.
    pub fn recover(&self) -> usize {
        let runs = self.inner.db.read().load_running_runs();
        let count = runs.len();
        for run in runs {
            info!("[flow] {}: resuming {}", run.run_id, run.protocol);
            self.spawn(run.run_id);
        }
        count
    }

    fn spawn(&self, run_id: Uuid) {
        let engine = self.clone();
        task::spawn(async move {
            engine.drive(run_id).await;
        });
    }

    /// Step the run until it terminates.
    async fn drive(&self, run_id: Uuid) {
        if !self.inner.active.lock().insert(run_id) {
            debug!("[flow] {}: already running", run_id);
            return;
        }
        let run = self.inner.db.read().load_run(&run_id);
        match run {
            Some(run) if !run.is_terminal() => self.step_run(run).await,
            Some(_) => debug!("[flow] {}: already terminated", run_id),
            None => warn!("[flow] {}: not found", run_id),
        }
        self.inner.active.lock().remove(&run_id);
    }

    async fn step_run(&self, mut run: FlowRun) {
        let inner = &*self.inner;
        let ctx = FlowContext {
            run_id: run.run_id,
            me: &inner.me,
            keypair: &inner.keypair,
            identity: inner.identity.as_ref(),
            notary: inner.notary.as_ref(),
            sessions: &inner.sessions,
            transport: inner.transport.as_ref(),
            ledger: &inner.ledger,
            config: &inner.config,
        };

        // Sessions opened before a restart get a fresh inbox.
        if let Some(session) = run.checkpoint.as_ref().and_then(|cp| cp.logic.session()) {
            inner.sessions.open(session.id);
        }

        let outcome = loop {
            let checkpoint = match run.checkpoint.as_mut() {
                Some(checkpoint) => checkpoint,
                None => break Err(Error::new_ext(ErrorKind::Other, "missing checkpoint")),
            };
            let step = checkpoint.step as usize;
            let kind = match checkpoint.logic.steps().get(step) {
                Some(kind) => *kind,
                None => break Err(Error::new_ext(ErrorKind::Other, "protocol ended without result")),
            };
            trace!("[flow] {}: step {} {:?}", run.run_id, step, kind);
            match checkpoint.logic.advance(&ctx, step).await {
                Ok(StepOutcome::Continue) => {
                    checkpoint.step += 1;
                    if let Err(err) = inner.db.write().store_run(&run) {
                        break Err(err);
                    }
                }
                Ok(StepOutcome::Finished(result)) => break Ok(result),
                Err(err) => break Err(err),
            }
        };

        let session = run.checkpoint.as_ref().and_then(|cp| cp.logic.session()).cloned();
        let settled = run.checkpoint.as_ref().and_then(|cp| cp.logic.settled());
        let outcome = match (outcome, settled) {
            (Err(err), Some(result)) => {
                error!(
                    "[flow] {}: {} failed after notarization: {}",
                    run.run_id,
                    run.protocol,
                    err.to_string_full()
                );
                Ok(result)
            }
            (outcome, _) => outcome,
        };
        match outcome {
            Ok(result) => {
                info!("[flow] {}: {} completed", run.run_id, run.protocol);
                run.status = RunStatus::Completed;
                run.result = Some(result);
            }
            Err(err) => {
                warn!("[flow] {}: {} failed: {}", run.run_id, run.protocol, err.to_string_full());
                // Tell the peer, unless it never heard of the session.
                if let Some(mut session) = session.clone() {
                    if session.initiating_flow.is_none() || session.send_seq > 0 {
                        let abort = session.envelope(&inner.me, SessionPayload::Abort(err.clone()));
                        if let Err(err) = inner.transport.deliver(abort) {
                            debug!("[flow] {}: abort not delivered: {}", run.run_id, err);
                        }
                    }
                }
                run.status = RunStatus::Failed;
                run.error = Some(err);
            }
        }
        if let Some(session) = session {
            inner.sessions.close(&session.id);
        }
        if let Err(err) = inner.db.write().store_run(&run) {
            error!("[flow] {}: final state not stored: {}", run.run_id, err.to_string_full());
        }
    }
}
