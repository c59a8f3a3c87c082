#![deny(unsafe_op_in_unsafe_fn)]
pub mod config;
pub mod forward;
pub mod signals;
pub mod systemd;
