//! Core domain types shared by every pipeline stage

pub mod record;
pub mod site;

pub use record::{MessageRecord, Origin};
pub use site::ConnectionSite;
