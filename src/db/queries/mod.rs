//! Database queries

pub mod billing;
pub mod reference;
pub mod settings;
