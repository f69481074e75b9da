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

//! Bounded async channels.
//!
//! Plain mpmc channels carry session envelopes between parties, confirmed
//! channels carry requests to a service together with the sender used to
//! deliver the reply.

use crate::{Error, ErrorKind};
use async_std::{
    channel::{self as async_channel, Receiver as AsyncReceiver, Sender as AsyncSender, TrySendError},
    future, task,
};
use std::{fmt::Display, pin::Pin, time::Duration};

/// Upper bound to outstanding channel elements.
const CHANNEL_BOUND: usize = 1000;

/// Errors which can be triggered by a channel.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ChannelError {
    /// Peer side dropped or closed.
    SendError,
    /// Channel full, only returned by non-blocking sends.
    Full,
    /// Channel empty and closed.
    RecvError,
    /// Nothing received within the deadline.
    RecvTimeout,
}

impl std::error::Error for ChannelError {}

impl Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ChannelError::SendError => "channel send error",
            ChannelError::Full => "channel full",
            ChannelError::RecvError => "channel recv error",
            ChannelError::RecvTimeout => "channel recv timeout",
        };
        write!(f, "{}", msg)
    }
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        let kind = match err {
            ChannelError::RecvTimeout => ErrorKind::SessionTimeout,
            _ => ErrorKind::BadNetwork,
        };
        Error::new_ext(kind, err)
    }
}

/// Creates a simple mpmc channel.
pub fn simple_channel<T>() -> (Sender<T>, Receiver<T>) {
    let (sender, receiver) = async_channel::bounded::<T>(CHANNEL_BOUND);
    (Sender(sender), Receiver(receiver))
}

/// Channel sender side.
pub struct Sender<T>(AsyncSender<T>);

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender(self.0.clone())
    }
}

impl<T> Sender<T> {
    /// Send a value, waiting for room if the channel is full.
    pub async fn send(&self, value: T) -> Result<(), ChannelError> {
        self.0.send(value).await.map_err(|_| ChannelError::SendError)
    }

    /// Send a value without waiting.
    pub fn try_send(&self, value: T) -> Result<(), ChannelError> {
        self.0.try_send(value).map_err(|err| match err {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Closed(_) => ChannelError::SendError,
        })
    }

    /// Synchronous wrapper of `send`.
    pub fn send_sync(&self, value: T) -> Result<(), ChannelError> {
        task::block_on(self.send(value))
    }

    /// Close the channel. Queued values can still be received.
    /// Returns true if this call closed the channel.
    pub fn close(&self) -> bool {
        self.0.close()
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Channel receiver side.
pub struct Receiver<T>(AsyncReceiver<T>);

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Receiver(self.0.clone())
    }
}

impl<T> Receiver<T> {
    /// Wait for the next value.
    pub async fn recv(&self) -> Result<T, ChannelError> {
        self.0.recv().await.map_err(|_| ChannelError::RecvError)
    }

    /// Wait for the next value, at most for `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<T, ChannelError> {
        match future::timeout(timeout, self.0.recv()).await {
            Ok(res) => res.map_err(|_| ChannelError::RecvError),
            Err(_) => Err(ChannelError::RecvTimeout),
        }
    }

    /// Synchronous wrapper of `recv`.
    pub fn recv_sync(&self) -> Result<T, ChannelError> {
        task::block_on(self.recv())
    }

    /// Synchronous wrapper of `recv_timeout`.
    pub fn recv_timeout_sync(&self, timeout: Duration) -> Result<T, ChannelError> {
        task::block_on(self.recv_timeout(timeout))
    }

    /// Close the channel. Queued values can still be received.
    /// Returns true if this call closed the channel.
    pub fn close(&self) -> bool {
        self.0.close()
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

impl<T> futures::Stream for Receiver<T> {
    type Item = T;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        Pin::new(&mut self.0).poll_next(cx)
    }
}

/// Reply side of a confirmed request.
pub type ResponseSender<Res> = Sender<Res>;

/// Returned by `RequestSender::send` to collect the reply.
pub type ResponseReceiver<Res> = Receiver<Res>;

/// Create a request channel whose consumer answers each request.
pub fn confirmed_channel<Req, Res>() -> (RequestSender<Req, Res>, RequestReceiver<Req, Res>) {
    let (sender, receiver) = async_channel::bounded::<(Req, Sender<Res>)>(CHANNEL_BOUND);
    (RequestSender(sender), RequestReceiver(receiver))
}

/// Requests producer. Clone it to submit requests from many threads.
pub struct RequestSender<Req, Res>(AsyncSender<(Req, Sender<Res>)>);

impl<Req, Res> Clone for RequestSender<Req, Res> {
    fn clone(&self) -> Self {
        RequestSender(self.0.clone())
    }
}

impl<Req, Res> RequestSender<Req, Res> {
    /// Submit a request, returning the receiver of the reply.
    pub async fn send(&self, request: Req) -> Result<ResponseReceiver<Res>, ChannelError> {
        let (res_tx, res_rx) = simple_channel();
        self.0
            .send((request, res_tx))
            .await
            .map_err(|_| ChannelError::SendError)?;
        Ok(res_rx)
    }

    /// Synchronous wrapper of `send`.
    pub fn send_sync(&self, request: Req) -> Result<ResponseReceiver<Res>, ChannelError> {
        task::block_on(self.send(request))
    }

    /// Close the channel. Queued requests can still be received.
    pub fn close(&self) -> bool {
        self.0.close()
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Requests consumer.
pub struct RequestReceiver<Req, Res>(AsyncReceiver<(Req, Sender<Res>)>);

impl<Req, Res> Clone for RequestReceiver<Req, Res> {
    fn clone(&self) -> Self {
        RequestReceiver(self.0.clone())
    }
}

impl<Req, Res> RequestReceiver<Req, Res> {
    /// Wait for the next request.
    pub async fn recv(&self) -> Result<(Req, ResponseSender<Res>), ChannelError> {
        self.0.recv().await.map_err(|_| ChannelError::RecvError)
    }

    /// Synchronous wrapper of `recv`.
    pub fn recv_sync(&self) -> Result<(Req, ResponseSender<Res>), ChannelError> {
        task::block_on(self.recv())
    }

    pub fn close(&self) -> bool {
        self.0.close()
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

impl<Req, Res> futures::Stream for RequestReceiver<Req, Res> {
    type Item = (Req, ResponseSender<Res>);

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        Pin::new(&mut self.0).poll_next(cx)
    }
}
