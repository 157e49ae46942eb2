// tably-common: shared types and utilities for the Tably workspace

pub mod identity;
pub mod protocol;
pub mod types;
pub mod url_policy;
