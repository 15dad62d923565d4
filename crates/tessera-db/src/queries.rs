//! Database query functions organized by domain.

pub mod grants;
pub mod orders;
pub mod secrets;
pub mod settings;
