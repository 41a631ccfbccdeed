pub mod config;
pub mod coordinator;
pub mod dashboard;
pub mod digest;
pub mod error;
pub mod node;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod worker;
