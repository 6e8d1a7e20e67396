//! Core of the Menta account-setup flow: the session reconciler state
//! machine, the ports it drives (identity service, professionals table,
//! local persistence), and the pure pieces it is built from (magic-link
//! token extraction, password rules, invitation checks).
//!
//! This crate never touches the network or the filesystem — adapters live
//! in `menta-cli`.

pub mod error;
pub mod invitation;
pub mod password;
pub mod ports;
pub mod reconciler;
pub mod session;
pub mod token;
