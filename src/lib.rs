pub mod chat;
pub mod config;
pub mod messages;
pub mod processor;
pub mod responses;
pub mod session;
pub mod step;
pub mod transport;
