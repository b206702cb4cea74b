//! Clients for services outside the process.

pub mod http_generator;

pub use http_generator::HttpGenerator;
