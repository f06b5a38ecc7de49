pub mod config;
pub mod election;
pub mod error;
pub mod hooks;
pub mod node;
pub mod shutdown;
pub mod status;
pub mod store;
