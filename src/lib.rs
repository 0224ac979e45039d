pub mod authority;
pub mod broker;
pub mod cli;
pub mod client;
pub mod config;
pub mod mcp;
pub mod server;
pub mod session;
pub mod tools;
