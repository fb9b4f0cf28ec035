//! Client and arbitrator for M Squared EMM / SolsTiS laser servers.
//!
//! The servers speak undelimited JSON over TCP. This crate reassembles frames
//! from the byte stream, correlates responses to requests by transmission id,
//! waits for `<op>_f_r` completion reports, and multiplexes the two mutually
//! exclusive servers behind a single-owner [`Arbitrator`].
//!
//! Layers, leaves first:
//!
//! - [`protocol`]: message envelope, frame decoder, correlator, report waiter
//! - [`hardware`]: device sessions and the bridge process supervisor
//! - [`backends`]: backend kinds and their static capability tables
//! - [`arbitrator`]: lease handling and backend swapping

pub mod arbitrator;
pub mod backends;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod hardware;
pub mod logging;
pub mod protocol;

pub use arbitrator::{Arbitrator, ClientLease, Request};
pub use backends::{Backend, BackendKind, Reply};
pub use config::LinkConfig;
pub use error::{LinkError, LinkResult};
pub use error_recovery::{FaultSource, RecoveredFault};
