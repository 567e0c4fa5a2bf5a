//! Debug session protocol and TCP server for the virtual hardware
//! simulator (C8): a length-delimited (newline-terminated) JSON
//! request/response channel carrying memory/register access, stepping,
//! breakpoints, and watchpoints with precise stop-reason semantics.

pub mod protocol;
pub mod server;
pub mod session;

pub use protocol::{dispatch, err_response, ok_response, Request};
pub use server::serve;
pub use session::{DebugSession, StopReason, WatchAccess};
