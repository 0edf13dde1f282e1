//! Layer dispatch and instrumentation for three-party secure neural-network inference.
//!
//! A compiled network calls the [`dispatcher::OperationDispatcher`] once per
//! layer; the dispatcher marshals tensors, applies party-dependent local
//! arithmetic and runs the matching primitive of a [`protocol::ProtocolEngine`],
//! while [`metrics::MetricsRecorder`] accounts time, CPU usage and traffic.

#[macro_use]
pub mod errors;
pub mod config;
mod constants;
pub mod conv;
pub mod dispatcher;
pub mod lifecycle;
pub mod marshal;
pub mod metrics;
pub mod party;
pub mod protocol;
pub mod tensor;
pub mod window;

#[cfg(test)]
#[macro_use]
extern crate maplit;
