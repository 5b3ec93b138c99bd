//! Type definitions

pub mod billing;
pub mod invoice;
pub mod messages;
pub mod reference;
pub mod settings;

pub use billing::*;
pub use invoice::*;
pub use messages::*;
pub use reference::*;
pub use settings::*;
