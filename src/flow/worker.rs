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
    dispatcher::Dispatcher,
    engine::FlowEngine,
    message::{FlowRequestReceiver, FlowResponseSender, Message},
    session::SessionMessage,
};
use crate::{channel::Receiver, db::Db};
use async_std::task::{self, Context, Poll};
use futures::{future, prelude::*};

pub struct FlowWorker<D: Db> {
    /// Flow engine shared with the service.
    engine: FlowEngine<D>,
    /// Flow requests receiver.
    rx_chan: FlowRequestReceiver,
    /// Session envelopes addressed to the local party.
    session_rx: Option<Receiver<SessionMessage>>,
    /// Dispatcher subsystem, in charge of handling incoming flow requests.
    dispatcher: Dispatcher<D>,
}

impl<D: Db> FlowWorker<D> {
    pub fn new(
        serial: u64,
        engine: FlowEngine<D>,
        rx_chan: FlowRequestReceiver,
        session_rx: Option<Receiver<SessionMessage>>,
    ) -> Self {
        let dispatcher = Dispatcher::new(engine.clone(), serial);
        FlowWorker {
            engine,
            rx_chan,
            session_rx,
            dispatcher,
        }
    }

    fn handle_message(&self, req: Message, res_chan: FlowResponseSender) {
        let dispatcher = self.dispatcher.clone();
        task::spawn(async move {
            if let Some(res) = dispatcher.message_handler(req) {
                if let Err(_err) = res_chan.send(res).await {
                    warn!("flow response send error");
                }
            }
        });
    }

    /// Flow worker asynchronous task.
    /// Resumes the running flows and then serves the requests until a `Stop`
    /// message is submitted to its input channel.
    pub async fn run(&mut self) {
        let resumed = self.engine.recover();
        if resumed > 0 {
            info!("[flow] resumed {} runs", resumed);
        }

        let future = future::poll_fn(move |cx: &mut Context<'_>| -> Poll<()> {
            if let Some(session_rx) = self.session_rx.as_mut() {
                loop {
                    match session_rx.poll_next_unpin(cx) {
                        Poll::Ready(Some(msg)) => self.engine.handle_session_message(msg),
                        Poll::Ready(None) => {
                            debug!("[flow] session channel closed");
                            self.session_rx = None;
                            break;
                        }
                        Poll::Pending => break,
                    }
                }
            }

            loop {
                match self.rx_chan.poll_next_unpin(cx) {
                    Poll::Ready(Some((Message::Stop, _))) => return Poll::Ready(()),
                    Poll::Ready(Some((req, res_chan))) => self.handle_message(req, res_chan),
                    Poll::Ready(None) => return Poll::Ready(()),
                    Poll::Pending => break,
                }
            }
            Poll::Pending
        });

        future.await
    }

    /// Flow worker synchronous task.
    pub fn run_sync(&mut self) {
        task::block_on(self.run());
    }
}
