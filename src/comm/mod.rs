//! Pluggable communicator backends for collective mesh exchange.
//!
//! The [`Communicator`] trait carries the small set of byte-level primitives
//! each backend must provide; every typed collective (reductions, scans,
//! gathers, variable all-to-all) is layered on top as a default method, so
//! backends stay thin. Backends:
//!
//! - [`SerialComm`]: single-rank, for serial runs and unit tests.
//! - [`ThreadComm`]: N ranks inside one process over a shared mailbox; this
//!   is what the multi-rank test suite runs on.
//! - `MpiComm` (feature `mpi-support`): inter-process via the `mpi` crate.

pub mod communicator;
pub mod repro;
pub mod thread_comm;

#[cfg(feature = "mpi-support")]
pub mod mpi_comm;

pub use communicator::{CommOp, CommValue, Communicator, SerialComm};
#[cfg(feature = "mpi-support")]
pub use mpi_comm::MpiComm;
pub use repro::repro_sum;
pub use thread_comm::ThreadComm;
