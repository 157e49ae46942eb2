// tably-daemon library entry point.

pub mod categorize;
pub mod config;
pub mod host;
pub mod rpc;
pub mod runtime;
pub mod security;
pub mod startup;
pub mod store;
pub mod sync;
pub mod timeout;
