//! Elastic worker pool built on the dispatch layer.

pub(crate) mod controller;
pub(crate) mod processor;
pub(crate) mod worker;

pub use controller::Controller;
pub use processor::{PoolHandle, Processor};
pub use worker::{InstanceId, Worker};
