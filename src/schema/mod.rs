//! Session input shapes and the artifact field schema
//!
//! This module defines the loosely structured session input, the fixed set
//! of canonical row fields with their aliases, and the fail-closed coercion
//! helpers used to read both.

pub mod coerce;
mod fields;
mod session;

pub use fields::*;
pub use session::*;
