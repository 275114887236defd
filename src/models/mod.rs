//! Domain model module declarations.

pub mod document;
pub mod event;
pub mod execution;
pub mod job;
