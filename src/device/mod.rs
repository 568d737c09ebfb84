pub mod btle;
pub mod connection;
pub mod constants;
pub mod permission;
pub mod scan;
pub mod transport;
pub mod types;
pub mod writer;
