//! The ambient status-event channel (SPEC_FULL.md §4.9): a notification
//! surface for the out-of-scope HTML topology page and front-panel LED
//! daemon to subscribe to. Same `sync_status_channel` /
//! `StatusChannelSender` / `StatusChannelReceiver` / `StatusEvented` shape
//! used for DDS discovery events elsewhere in this ecosystem, trimmed to
//! target `mio` 0.8 only and re-themed around mesh events.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::stream::{FusedStream, Stream};
use mio::{event, Interest, Registry, Token};
use mio_extras::channel as mio_channel;

use crate::lock::LockKind;
use crate::mac::MacAddress;
use crate::mio_source::{make_poll_channel, PollEventSender, PollEventSource};

/// Why a tree edge went away, for [`MeshStatusEvent::TreeEdgeRemoved`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeRemovedReason {
  PeerRequested,
  CycleDetected,
  LocalSwap,
  UnroutableThreshold,
}

/// Payload-free tag for a [`LockKind`], used when an event only needs to
/// say *which kind* of lock timed out, not its full contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKindTag {
  StpAddReq,
  LockReqOld,
  LockReqNew,
  StpBeaconAck,
  AdHocBcastBlock,
  ParmChangeStart,
  ParmChangeReady,
  ParmChangeGo,
}

impl From<&LockKind> for LockKindTag {
  fn from(kind: &LockKind) -> Self {
    match kind {
      LockKind::StpAddReq => LockKindTag::StpAddReq,
      LockKind::LockReqOld { .. } => LockKindTag::LockReqOld,
      LockKind::LockReqNew { .. } => LockKindTag::LockReqNew,
      LockKind::StpBeaconAck { .. } => LockKindTag::StpBeaconAck,
      LockKind::AdHocBcastBlock { .. } => LockKindTag::AdHocBcastBlock,
      LockKind::ParmChangeStart => LockKindTag::ParmChangeStart,
      LockKind::ParmChangeReady => LockKindTag::ParmChangeReady,
      LockKind::ParmChangeGo => LockKindTag::ParmChangeGo,
    }
  }
}

/// The mesh-daemon analogue of a `DomainParticipantStatusEvent`: the set of
/// notifications an out-of-scope consumer could subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MeshStatusEvent {
  NeighborTableChanged,
  TreeEdgeAdded { peer: MacAddress },
  TreeEdgeRemoved { peer: MacAddress, reason: EdgeRemovedReason },
  BeaconTimedOut { origin: MacAddress },
  AdHocClientClaimed { station: MacAddress },
  AdHocClientLost { station: MacAddress },
  LockTimedOut { kind: LockKindTag, peer: MacAddress },
}

pub trait StatusEvented<'a, E, S>
where
  S: Stream<Item = E> + FusedStream,
{
  fn as_status_source(&mut self) -> &mut dyn event::Source;
  fn as_async_status_stream(&'a self) -> S;
  fn try_recv_status(&self) -> Option<E>;
}

pub fn sync_status_channel<T>(capacity: usize) -> io::Result<(StatusChannelSender<T>, StatusChannelReceiver<T>)> {
  let (signal_source, signal_sender) = make_poll_channel()?;
  let (actual_sender, actual_receiver) = mio_channel::sync_channel(capacity);
  let waker: Arc<Mutex<Option<Waker>>> = Arc::new(Mutex::new(None));
  Ok((
    StatusChannelSender { actual_sender, signal_sender, waker: Arc::clone(&waker) },
    StatusChannelReceiver { actual_receiver: Mutex::new(actual_receiver), signal_source, waker },
  ))
}

#[derive(Clone)]
pub struct StatusChannelSender<T> {
  actual_sender: mio_channel::SyncSender<T>,
  signal_sender: PollEventSender,
  waker: Arc<Mutex<Option<Waker>>>,
}

impl<T> StatusChannelSender<T> {
  /// Best-effort send: a full channel (no one listening promptly) is not
  /// treated as an error, since no consumer is required to be subscribed.
  pub fn try_send(&self, t: T) -> Result<(), mio_channel::TrySendError<T>> {
    let mut waker_slot = self.waker.lock().unwrap();
    match self.actual_sender.try_send(t) {
      Ok(()) => {
        self.signal_sender.send();
        if let Some(w) = waker_slot.take() {
          w.wake();
        }
        Ok(())
      }
      Err(mio_channel::TrySendError::Full(_dropped)) => {
        log::trace!("status channel full, dropping event");
        self.signal_sender.send();
        if let Some(w) = waker_slot.take() {
          w.wake();
        }
        Ok(())
      }
      Err(other) => Err(other),
    }
  }
}

pub struct StatusChannelReceiver<T> {
  actual_receiver: Mutex<mio_channel::Receiver<T>>,
  signal_source: PollEventSource,
  waker: Arc<Mutex<Option<Waker>>>,
}

impl<T> StatusChannelReceiver<T> {
  pub fn try_recv(&self) -> Result<T, std::sync::mpsc::TryRecvError> {
    self.signal_source.drain();
    self.actual_receiver.lock().unwrap().try_recv()
  }
}

impl<T> event::Source for StatusChannelReceiver<T> {
  fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
    self.signal_source.register(registry, token, interests)
  }

  fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
    self.signal_source.reregister(registry, token, interests)
  }

  fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
    self.signal_source.deregister(registry)
  }
}

impl<'a, E> StatusEvented<'a, E, StatusReceiverStream<'a, E>> for StatusChannelReceiver<E> {
  fn as_status_source(&mut self) -> &mut dyn event::Source {
    self
  }

  fn as_async_status_stream(&'a self) -> StatusReceiverStream<'a, E> {
    StatusReceiverStream { receiver: self, terminated: AtomicBool::new(false) }
  }

  fn try_recv_status(&self) -> Option<E> {
    self.try_recv().ok()
  }
}

pub struct StatusReceiverStream<'a, T> {
  receiver: &'a StatusChannelReceiver<T>,
  terminated: AtomicBool,
}

impl<T> Stream for StatusReceiverStream<'_, T> {
  type Item = T;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let mut waker_slot = self.receiver.waker.lock().unwrap();
    match self.receiver.try_recv() {
      Err(std::sync::mpsc::TryRecvError::Empty) => {
        *waker_slot = Some(cx.waker().clone());
        Poll::Pending
      }
      Err(std::sync::mpsc::TryRecvError::Disconnected) => {
        self.terminated.store(true, Ordering::SeqCst);
        Poll::Ready(None)
      }
      Ok(event) => Poll::Ready(Some(event)),
    }
  }
}

impl<T> FusedStream for StatusReceiverStream<'_, T> {
  fn is_terminated(&self) -> bool {
    self.terminated.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn send_then_recv_round_trips_an_event() {
    let (tx, rx) = sync_status_channel::<MeshStatusEvent>(8).unwrap();
    tx.try_send(MeshStatusEvent::NeighborTableChanged).unwrap();
    assert_eq!(rx.try_recv(), Ok(MeshStatusEvent::NeighborTableChanged));
  }

  #[test]
  fn full_channel_does_not_error_the_sender() {
    let (tx, _rx) = sync_status_channel::<MeshStatusEvent>(1).unwrap();
    tx.try_send(MeshStatusEvent::NeighborTableChanged).unwrap();
    // channel now full; a second send must still report Ok (best-effort).
    assert!(tx.try_send(MeshStatusEvent::NeighborTableChanged).is_ok());
  }
}
