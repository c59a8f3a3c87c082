//! Log targets routed to their own files.
//!
//! These mirror the targets `awdlguard-core` logs under. Anything else goes
//! to the component file.

pub const T_AUTH: &str = "awdlguard::auth";
pub const T_NET: &str = "awdlguard::net";
