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

//! Session transport.
//!
//! A session is an ordered point to point exchange between two flow runs on
//! different parties. Every envelope carries a per direction sequence number:
//! the receiving run drops envelopes it has already consumed, so the
//! transport is free to deliver more than once.
//!
//! The session state (identifier, peer and sequence numbers) is part of the
//! owning run checkpoint. The inbox is not: a resumed run gets a fresh one.

use crate::{
    base::{Mutex, NotarizedTransaction, Party, RwLock, SignedTransaction, TransactionSignature},
    channel::{simple_channel, ChannelError, Receiver, Sender},
    crypto::PublicKey,
    Error, ErrorKind, Result,
};
#[cfg(test)]
use mockall::automock;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};
use uuid::Uuid;

/// Payloads exchanged by the launch protocol.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum SessionPayload {
    /// Transaction signed by the launcher.
    Proposal(SignedTransaction),
    /// Target signature over the proposal.
    Signature(TransactionSignature),
    /// Notarized transaction.
    Finality(NotarizedTransaction),
    /// Finality recorded by the target.
    Ack,
    /// Sender run failed.
    Abort(Error),
}

/// Session envelope.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionMessage {
    pub session_id: Uuid,
    pub sender: Party,
    pub recipient: PublicKey,
    pub seq: u64,
    /// Protocol the recipient has to start to serve the session.
    pub initiating_flow: Option<String>,
    pub payload: SessionPayload,
}

/// Session endpoint state, owned by a flow run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    /// Owning run.
    pub local_run: Uuid,
    /// Counterparty.
    pub peer: Party,
    /// Set on the initiating side only.
    pub initiating_flow: Option<String>,
    /// Next sequence number to send.
    pub send_seq: u64,
    /// Next sequence number expected.
    pub recv_seq: u64,
}

impl Session {
    /// Open a new session towards `peer`.
    pub fn open(local_run: Uuid, peer: Party, initiating_flow: &str) -> Self {
        Session {
            id: Uuid::new_v4(),
            local_run,
            peer,
            initiating_flow: Some(initiating_flow.to_owned()),
            send_seq: 0,
            recv_seq: 0,
        }
    }

    /// Counterpart of a session opened by the message sender.
    pub fn accept(local_run: Uuid, msg: &SessionMessage) -> Self {
        Session {
            id: msg.session_id,
            local_run,
            peer: msg.sender.clone(),
            initiating_flow: None,
            send_seq: 0,
            recv_seq: 0,
        }
    }

    /// Envelope for the next outgoing payload.
    pub fn envelope(&mut self, me: &Party, payload: SessionPayload) -> SessionMessage {
        let msg = SessionMessage {
            session_id: self.id,
            sender: me.clone(),
            recipient: self.peer.owning_key.clone(),
            seq: self.send_seq,
            initiating_flow: self.initiating_flow.clone(),
            payload,
        };
        self.send_seq += 1;
        msg
    }

    /// Check an incoming envelope, advancing the receive sequence.
    /// Returns `None` for envelopes to be dropped.
    pub fn accept_envelope(&mut self, msg: SessionMessage) -> Option<SessionPayload> {
        if msg.sender.owning_key != self.peer.owning_key {
            warn!(
                "[session] {}: dropping message from unexpected sender {}",
                self.id, msg.sender
            );
            return None;
        }
        if msg.seq < self.recv_seq {
            debug!(
                "[session] {}: dropping duplicate message {} (expected {})",
                self.id, msg.seq, self.recv_seq
            );
            return None;
        }
        self.recv_seq = msg.seq + 1;
        Some(msg.payload)
    }
}

/// Outbound delivery of session envelopes.
#[cfg_attr(test, automock)]
pub trait Transport: Send + Sync + 'static {
    /// Hand over an envelope for delivery to its recipient.
    fn deliver(&self, msg: SessionMessage) -> Result<()>;
}

/// In process network connecting the parties of a test bench or of a
/// single host deployment.
#[derive(Default)]
pub struct LocalNetwork {
    routes: RwLock<HashMap<PublicKey, Sender<SessionMessage>>>,
    duplicate: AtomicBool,
}

impl LocalNetwork {
    pub fn new() -> Self {
        LocalNetwork::default()
    }

    /// Attach a party, returning the receiver of the envelopes addressed to it.
    pub fn register(&self, party: &Party) -> Receiver<SessionMessage> {
        let (tx_chan, rx_chan) = simple_channel();
        self.routes.write().insert(party.owning_key.clone(), tx_chan);
        rx_chan
    }

    /// Detach a party.
    pub fn disconnect(&self, key: &PublicKey) {
        if let Some(tx_chan) = self.routes.write().remove(key) {
            tx_chan.close();
        }
    }

    /// Deliver every envelope twice.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.duplicate.store(enabled, Ordering::Relaxed);
    }
}

impl Transport for LocalNetwork {
    fn deliver(&self, msg: SessionMessage) -> Result<()> {
        let routes = self.routes.read();
        let tx_chan = routes.get(&msg.recipient).ok_or_else(|| {
            Error::new_ext(
                ErrorKind::BadNetwork,
                format!("unreachable party {}", msg.recipient.to_fingerprint()),
            )
        })?;
        trace!(
            "[network] {} seq {} to {}",
            msg.session_id,
            msg.seq,
            msg.recipient.to_fingerprint()
        );
        if self.duplicate.load(Ordering::Relaxed) {
            tx_chan.try_send(msg.clone())?;
        }
        tx_chan.try_send(msg)?;
        Ok(())
    }
}

/// Party side sessions registry.
/// Owns the inboxes of the sessions served by the local runs. An inbox lives
/// as long as its owning run: envelopes arriving afterwards are resolved by
/// the engine through the run token.
#[derive(Default)]
pub struct SessionManager {
    inboxes: Mutex<HashMap<Uuid, (Sender<SessionMessage>, Receiver<SessionMessage>)>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager::default()
    }

    /// Get or create the session inbox.
    pub fn open(&self, id: Uuid) -> Receiver<SessionMessage> {
        let mut inboxes = self.inboxes.lock();
        let (_, rx_chan) = inboxes.entry(id).or_insert_with(simple_channel);
        rx_chan.clone()
    }

    /// Session inbox, if the session is open.
    pub fn inbox(&self, id: &Uuid) -> Option<Receiver<SessionMessage>> {
        self.inboxes.lock().get(id).map(|(_, rx_chan)| rx_chan.clone())
    }

    /// Session served by a running flow.
    pub fn is_open(&self, id: &Uuid) -> bool {
        self.inboxes.lock().contains_key(id)
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.inboxes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue an incoming envelope into its session inbox.
    pub fn dispatch(&self, msg: SessionMessage) -> Result<()> {
        let inboxes = self.inboxes.lock();
        match inboxes.get(&msg.session_id) {
            Some((tx_chan, _)) => tx_chan.try_send(msg).map_err(Error::from),
            None => Err(Error::new_ext(
                ErrorKind::ResourceNotFound,
                format!("unknown session {}", msg.session_id),
            )),
        }
    }

    /// Tear down the session.
    pub fn close(&self, id: &Uuid) {
        if let Some((tx_chan, _)) = self.inboxes.lock().remove(id) {
            tx_chan.close();
        }
    }

    /// Wait for the next payload of the session.
    /// Duplicates are dropped, an `Abort` from the peer is reported as the
    /// peer error.
    pub async fn receive(&self, session: &mut Session, timeout: Duration) -> Result<SessionPayload> {
        let inbox = self.inbox(&session.id).ok_or_else(|| {
            Error::new_ext(ErrorKind::BadNetwork, format!("session {} closed", session.id))
        })?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let msg = inbox.recv_timeout(remaining).await.map_err(|err| match err {
                ChannelError::RecvTimeout => Error::new_ext(
                    ErrorKind::SessionTimeout,
                    format!(
                        "no message from {} within {} ms",
                        session.peer,
                        timeout.as_millis()
                    ),
                ),
                err => Error::from(err),
            })?;
            match session.accept_envelope(msg) {
                Some(SessionPayload::Abort(err)) => return Err(err),
                Some(payload) => return Ok(payload),
                None => continue,
            }
        }
    }
}
