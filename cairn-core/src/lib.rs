//! cairn-core: request context, access levels and configuration shared by
//! cairn services.

pub mod access;
pub mod config;

pub use access::{AccessError, AccessLevel, AccessPolicy, Principal, RequestContext, Token};
pub use config::{CairnConfig, ConfigSnapshot};
