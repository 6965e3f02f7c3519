//! Utility modules: retry, timeout, naming.

pub mod naming;
pub mod retry;
pub mod timeout;
