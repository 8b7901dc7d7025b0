pub mod config;
mod connection;
pub mod error;
pub mod measurement;
pub mod notify;
mod reader;
pub mod sender;
pub mod service;
pub mod transport;

pub use config::{ConnectionSettings, SequenceConfig};
pub use notify::{Notification, Notifier};
pub use service::SerialService;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
