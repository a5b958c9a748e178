pub mod actor;
pub mod handler;
pub mod handshake;
pub mod protocol;
