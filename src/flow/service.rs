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

use super::{
    engine::FlowEngine,
    message::{FlowRequestSender, Message},
    session::{SessionMessage, Transport},
    worker::FlowWorker,
};
use crate::{
    base::RwLock,
    channel::{confirmed_channel, Receiver},
    config::NodeConfig,
    crypto::KeyPair,
    db::Db,
    identity::IdentityService,
    notary::Notary,
    Result,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Flow service data.
pub struct FlowService<D: Db> {
    /// Worker object.
    worker: Option<FlowWorker<D>>,
    /// Threads data.
    handler: Option<JoinHandle<FlowWorker<D>>>,
    /// To send messages to worker.
    tx_chan: FlowRequestSender,
    /// Engine shared with the worker.
    engine: FlowEngine<D>,
    /// To check if the worker thread is still alive.
    canary: Arc<()>,
}

impl<D: Db> FlowService<D> {
    /// Create a new flow service instance.
    /// Session envelopes received from `session_rx`, if any, are routed to
    /// the engine by the worker.
    pub fn new(
        serial: u64,
        engine: FlowEngine<D>,
        session_rx: Option<Receiver<SessionMessage>>,
    ) -> Self {
        let (tx_chan, rx_chan) = confirmed_channel::<Message, Message>();

        let worker = FlowWorker::new(serial, engine.clone(), rx_chan, session_rx);

        FlowService {
            worker: Some(worker),
            handler: None,
            tx_chan,
            engine,
            canary: Arc::new(()),
        }
    }

    /// Flow service of the node described by `config`.
    pub fn from_config(
        config: &NodeConfig,
        keypair: KeyPair,
        db: D,
        identity: Arc<dyn IdentityService>,
        notary: Arc<dyn Notary>,
        transport: Arc<dyn Transport>,
        session_rx: Option<Receiver<SessionMessage>>,
    ) -> Result<Self> {
        let db = Arc::new(RwLock::new(db));
        let engine = FlowEngine::from_config(config, keypair, db, identity, notary, transport)?;
        Ok(Self::new(config.serial, engine, session_rx))
    }

    /// Start flow service.
    pub fn start(&mut self) {
        debug!("Starting flow service");
        let mut worker = match self.worker.take() {
            Some(worker) => worker,
            None => {
                warn!("service was already running");
                return;
            }
        };

        let mut canary = Arc::clone(&self.canary);
        let handle = thread::spawn(move || {
            let _ = Arc::get_mut(&mut canary);
            worker.run_sync();
            worker
        });
        self.handler = Some(handle);
    }

    /// Stop flow service.
    pub fn stop(&mut self) {
        debug!("Stopping flow service");
        match self.handler.take() {
            Some(handle) => {
                if let Err(err) = self.tx_chan.send_sync(Message::Stop) {
                    error!("Error stopping flow service thread: {:?}", err);
                }
                match handle.join() {
                    Ok(worker) => self.worker = Some(worker),
                    Err(_) => error!("flow service thread panicked"),
                }
            }
            None => {
                debug!("service was not running");
            }
        };
    }

    /// Check if service is running.
    pub fn is_running(&self) -> bool {
        // Intercepts crashed subthreads.
        Arc::strong_count(&self.canary) == 2 && self.worker.is_none()
    }

    /// Get a clone of flow-service input channel.
    pub fn request_channel(&self) -> FlowRequestSender {
        self.tx_chan.clone()
    }

    /// Get the flow engine.
    pub fn engine(&self) -> FlowEngine<D> {
        self.engine.clone()
    }
}
