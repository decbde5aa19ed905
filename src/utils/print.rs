//! Logging helpers: role-prefixed wrappers around the `log` facade.
//!
//! Every peer process hosts exactly one replica, so rather than threading a
//! `ReplicaId` through every log call, each process records its own id once
//! at startup and the `pf_*!` macros below pick it up implicitly.

use std::cell::RefCell;

thread_local! {
    /// Label prefixed to every `pf_*!` log line, set once via [`set_me`].
    pub static ME: RefCell<String> = RefCell::new(String::from("?"));
}

/// Records this process's identity for use as the log line prefix. Call once
/// at startup on the dispatcher task (or any task that will emit logs).
pub fn set_me(label: impl Into<String>) {
    ME.with(|m| *m.borrow_mut() = label.into());
}

/// Initializes `env_logger` from `RUST_LOG`, defaulting to `info`.
pub fn logger_init() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .is_test(false)
    .try_init();
}

#[macro_export]
macro_rules! pf_trace {
    ($($arg:tt)*) => {
        log::trace!("{} {}", $crate::utils::print::ME.with(|m| m.borrow().clone()), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! pf_debug {
    ($($arg:tt)*) => {
        log::debug!("{} {}", $crate::utils::print::ME.with(|m| m.borrow().clone()), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! pf_info {
    ($($arg:tt)*) => {
        log::info!("{} {}", $crate::utils::print::ME.with(|m| m.borrow().clone()), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! pf_warn {
    ($($arg:tt)*) => {
        log::warn!("{} {}", $crate::utils::print::ME.with(|m| m.borrow().clone()), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! pf_error {
    ($($arg:tt)*) => {
        log::error!("{} {}", $crate::utils::print::ME.with(|m| m.borrow().clone()), format!($($arg)*))
    };
}

/// Builds a [`RaftError::Msg`](crate::utils::RaftError), logs it at `error`,
/// and evaluates to `Err(..)` -- for the common "this is both a log line and
/// a propagated error" case.
#[macro_export]
macro_rules! logged_err {
    ($fmt:literal $(, $args:expr)* $(,)?) => {{
        let msg = format!($fmt $(, $args)*);
        $crate::pf_error!("{}", msg);
        Err($crate::utils::RaftError::msg(msg))
    }};
    ($tag:literal; $fmt:literal $(, $args:expr)* $(,)?) => {{
        let msg = format!(concat!("[{}] ", $fmt), $tag $(, $args)*);
        $crate::pf_error!("{}", msg);
        Err($crate::utils::RaftError::msg(msg))
    }};
}
