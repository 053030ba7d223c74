//! A self-pipe that can sit in an `mio::Poll` registry, used to lift
//! non-socket wakeups (status events, the timer thread) into the single
//! event loop (spec.md §5, "a self-pipe used to lift interrupt-style
//! wakeups into the select loop"). Targets `mio` 0.8 only -- no mio-0.6
//! dual compatibility shim is needed here.

use std::io::{self, Read, Write};

use mio::net::UnixStream;
use mio::{event, Interest, Registry, Token};

/// The writer half. `send()` is a best-effort, non-blocking wakeup: if the
/// pipe is momentarily full the event loop is already guaranteed to wake up
/// for the bytes already buffered, so a failed write here is not an error.
#[derive(Clone)]
pub struct PollEventSender {
  inner: std::sync::Arc<UnixStream>,
}

impl PollEventSender {
  pub fn send(&self) {
    let mut stream = &*self.inner;
    match stream.write_all(&[1u8]) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
      Err(e) => log::warn!("self-pipe wakeup send failed: {e}"),
    }
  }
}

/// The reader half, registered with the event loop's `Poll`.
pub struct PollEventSource {
  inner: UnixStream,
}

impl PollEventSource {
  /// Drains every pending wakeup byte so the next `Poll::poll` call
  /// correctly reports "nothing pending" until the next `send()`.
  pub fn drain(&self) {
    let mut stream = &self.inner;
    let mut buf = [0u8; 64];
    loop {
      match stream.read(&mut buf) {
        Ok(0) => break,
        Ok(_) => continue,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
        Err(e) => {
          log::warn!("self-pipe drain failed: {e}");
          break;
        }
      }
    }
  }
}

impl event::Source for PollEventSource {
  fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
    self.inner.register(registry, token, interests)
  }

  fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
    self.inner.reregister(registry, token, interests)
  }

  fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
    self.inner.deregister(registry)
  }
}

/// Creates a connected pair: the `PollEventSource` to register with
/// `Poll`, and the `PollEventSender` any number of clones of which may
/// call `send()` from other threads.
pub fn make_poll_channel() -> io::Result<(PollEventSource, PollEventSender)> {
  let (a, b) = UnixStream::pair()?;
  Ok((PollEventSource { inner: a }, PollEventSender { inner: std::sync::Arc::new(b) }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use mio::{Events, Poll};

  #[test]
  fn send_wakes_a_registered_poll() {
    let (mut source, sender) = make_poll_channel().unwrap();
    let mut poll = Poll::new().unwrap();
    poll.registry().register(&mut source, Token(0), Interest::READABLE).unwrap();

    sender.send();

    let mut events = Events::with_capacity(4);
    poll.poll(&mut events, Some(std::time::Duration::from_secs(1))).unwrap();
    assert!(events.iter().any(|e| e.token() == Token(0)));
    source.drain();
  }
}
