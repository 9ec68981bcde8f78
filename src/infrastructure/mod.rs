//! Infrastructure Layer
//!
//! Cross-cutting concerns that are not part of the request path.

pub mod shutdown;

pub use shutdown::{shutdown_signal, RequestGuard, ShutdownController};
