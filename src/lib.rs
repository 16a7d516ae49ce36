//! # Lapyx
//!
//! Administrative control panel: a login page and a control panel gated by
//! SQL-backed accounts and sessions, served by a pool of worker processes
//! kept alive by a supervising primary.
//!
//! The engineering core is three pieces:
//!
//! - [`auth::password`]: the deterministic credential derivation scheme
//!   used in place of plaintext passwords.
//! - [`auth::session`]: session issuance, validation, and revocation,
//!   driving the gate on every protected route.
//! - [`supervisor`]: the primary/worker process model with unconditional
//!   restarts and a shared listening port.
//!
//! Everything else (routing, static assets, the store schema) is thin glue
//! around those three.

pub mod api;
pub mod auth;
pub mod cli;
pub mod supervisor;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
