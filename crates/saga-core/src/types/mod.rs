//! Core types for saga.

mod character;
mod fact;
mod filter;
mod identity;
mod message;

pub use character::*;
pub use fact::*;
pub use filter::*;
pub use identity::*;
pub use message::*;
