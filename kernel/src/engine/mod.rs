//! Implementations of [`TimeTravelClient`](crate::TimeTravelClient).

pub mod memory;
pub mod spanner;
