//! Helm Broker - Open Service Broker exposing Helm charts as services
//!
//! The broker core lives in the `hb-*` workspace crates. This crate wires
//! them into a runnable service.
//!
//! # Modules
//!
//! - [`config`] - Command line and environment configuration
//! - [`catalog`] - Loading bundles and charts from a catalog directory
//! - [`server`] - OSB HTTP endpoints
//! - [`error`] - OSB error responses

#![deny(missing_docs)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod server;
