//! Core business logic module

pub mod adapter;
pub mod classifier;
pub mod connector;
pub mod discovery;
pub mod error;
pub mod events;
pub mod permissions;
pub mod registry;
pub mod service;
pub mod types;
