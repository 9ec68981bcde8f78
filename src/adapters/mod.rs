//! Adapters Layer
//!
//! `inbound` drives the application (HTTP server), `outbound` implements
//! the domain ports (registry storage, upstream probing).

pub mod inbound;
pub mod outbound;
