//! Distributed data movement: remote entity addresses and the reusable
//! communication plan that routes entity data between ranks.

pub mod distribution;
pub mod remotes;

pub use distribution::Distribution;
pub use remotes::Remote;
