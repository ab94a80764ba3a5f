//! Application services wiring the domain to the ports.

pub mod producer;
pub mod streamer;
pub mod worker;

pub use producer::Producer;
pub use streamer::Streamer;
pub use worker::Worker;
