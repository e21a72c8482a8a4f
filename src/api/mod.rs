//! HTTP access to the rental backend.

mod client;
mod error;

pub use client::{ApiClient, CallState, GetOptions, MutateOptions};
pub use error::ApiError;
