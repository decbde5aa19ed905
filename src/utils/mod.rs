//! Helper utilities, functions, and macros shared by the consensus core and
//! its client/server binaries.

#[macro_use]
pub mod print;

#[macro_use]
mod config;

mod error;
mod framing;
mod timer;

pub use error::RaftError;
pub use framing::{recv_frame, send_frame, FRAME_LEN_WIDTH};
pub use print::{logger_init, set_me};
pub use timer::{ElectionTimer, LastContact};

// `#[macro_export]` macros are always rooted at the crate root; re-export
// them here too so call sites can `use crate::utils::{pf_trace, ...}`
// alongside the rest of this module's non-macro items.
pub use crate::{logged_err, pf_debug, pf_error, pf_info, pf_trace, pf_warn};
