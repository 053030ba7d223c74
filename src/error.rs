// Only startup-fatal failures propagate as `Result`. Everything a running
// event loop can recover from is logged and handled locally (spec §7);
// see the module-level docs on `mesh` for the recoverable-error policy.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
  #[error("failed to bind transport on device {device:?}: {source}")]
  TransportBind {
    device: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to register {what} with the event loop: {source}")]
  PollRegister {
    what: &'static str,
    #[source]
    source: io::Error,
  },

  #[error("could not create self-pipe waker: {source}")]
  WakerInit {
    #[source]
    source: io::Error,
  },

  #[error("configuration file {path:?} could not be read: {source}")]
  ConfigRead {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("malformed line {line} in {path:?}: {reason}")]
  ConfigParse {
    path: PathBuf,
    line: usize,
    reason: String,
  },
}
