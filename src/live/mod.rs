//! Live and paper trading: the order lifecycle manager and the session
//! driver around it.

pub mod config;
pub mod control;
pub mod order_manager;
pub mod retry;
pub mod scheduler;
pub mod session;
