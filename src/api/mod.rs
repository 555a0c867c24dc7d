//! API Module
//!
//! axum server exposing health probes, Prometheus metrics, class
//! diagnostics and the admission webhook.

pub mod rest;
pub mod server;
pub mod webhook;

pub use rest::*;
pub use server::*;
pub use webhook::Admission;
