//! Domain logic that does not touch storage directly.

pub mod billing;
pub mod data;
pub mod forms;
pub mod import;
pub mod integrations;
