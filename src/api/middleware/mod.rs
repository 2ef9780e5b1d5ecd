//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Auth validator: session lookup, injects `Caller`
//! 2. Audit logger: logs after auth, has the caller's identity

pub mod audit;
pub mod auth;
