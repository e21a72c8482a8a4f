//! Client data layer for a rental property back office.
//!
//! Reads go through a persistent response cache, writes are applied
//! optimistically to local collections and rolled back when the server
//! refuses them.

pub mod api;
pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod logging;
pub mod model;
pub mod optimistic;
pub mod portfolio;
pub mod query;
pub mod render;
pub mod report;
pub mod resource;
pub mod session;
pub mod validation;
