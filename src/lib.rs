//! LoanBridge: cross-channel loan application intake.
//!
//! The crate hosts the application state store, reference code service,
//! cross-channel synchronization engine, and wizard step controller behind an
//! axum HTTP surface. Channel transports (web frontend, WhatsApp bot, admin
//! console) and downstream systems (document pipeline, scoring, catalog) live
//! elsewhere and reach this service over HTTP or through the trait seams in
//! [`workflows::intake`].

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
