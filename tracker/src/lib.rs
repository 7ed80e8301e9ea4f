pub extern crate nalgebra as na;

pub use crate::error::{Error, ErrorKind};
pub use crate::service::Tracker;

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod interruptor;
pub mod propagator;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod store;

#[cfg(test)]
mod testing;
