//! Port traits: the seams between the domain and the outside world.

pub mod config_port;
pub mod data_port;
pub mod gateway_port;
pub mod store_port;
pub mod clock_port;
