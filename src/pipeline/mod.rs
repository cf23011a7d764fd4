//! Per-message processing stages that run before delivery

pub mod validator;

pub use validator::{validate, ParseError, ValidatedPayload};
