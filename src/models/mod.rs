//! Domain model module declarations.

pub mod cell;
pub mod context;
pub mod diagnostic;
pub mod event;
pub mod position;
