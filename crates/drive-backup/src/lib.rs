pub mod config;
pub mod credentials;
pub mod error;
pub mod import;
pub mod namespace;
pub mod remote;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod store;
pub mod sync;
pub mod watch;

pub use error::{Error, Result};
