//! Domain layer for the foreman delegation engine.
//!
//! Core business logic and domain models, free of infrastructure
//! concerns.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    DelegationError, DelegationResult, ModelError, ToolError, UnusableKind, ValidationError,
    ValidationErrorKind,
};
