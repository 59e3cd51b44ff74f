//! Protocol front-end: line framing plus the three connection types that
//! feed the engine — reply listener, command listener, hub client.

pub mod command_listener;
pub mod hub_client;
pub mod line;
pub mod reply_listener;
