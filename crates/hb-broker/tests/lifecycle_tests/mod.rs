//! Integration tests for the broker core
//!
//! # Test Organization
//!
//! - `provision_flow`: Stories about a platform provisioning an instance,
//!   polling it to completion and repeating the request
//!
//! - `deprovision_flow`: Stories about removing instances, including ones
//!   the broker never saw, and draining work on shutdown

mod deprovision_flow;
mod helpers;
mod provision_flow;
