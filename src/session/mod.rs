//! Session management module.
//!
//! This module provides the types shared by the durable store and the
//! connection orchestrator: session identification, lifecycle status and
//! the persisted session record.

mod id;
mod record;
mod status;

pub use id::SessionId;
pub use record::{validate_name, Session, MAX_NAME_LEN};
pub use status::SessionStatus;
