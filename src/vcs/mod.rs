//! # Revision Tracking
//!
//! Components and revisions live in a remote backend reached through a
//! [`Session`]. Requests name an [`Operation`] and carry JSON params.
//!
//! | Session | Backend |
//! |---------|---------|
//! | [`LocalSession`] | JSON document on disk, `fs2` lock per request |
//! | [`ProcessSession`] | external executable, one JSON line each way |

mod component;
mod local;
mod process;
mod protocol;
mod session;

pub use component::{Component, ComponentError, Revision, Transaction};
pub use local::LocalSession;
pub use process::ProcessSession;
pub use protocol::{
    Ack, ComponentRecord, Operation, RevisionRecord, SessionRequest, SessionResponse,
};
pub use session::{call, Session, SessionError};
