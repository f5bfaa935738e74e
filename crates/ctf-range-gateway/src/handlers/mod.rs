//! HTTP request handlers.
//!
//! This module contains all the endpoint handlers for the gateway API.

pub mod challenges;
pub mod health;
pub mod levels;
pub mod vms;

#[cfg(test)]
pub(crate) mod testing;
