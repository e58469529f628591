#![no_std]
#[cfg(feature = "std")]
extern crate std;

#[cfg(feature = "slave")]
mod mutex;

pub mod protocol;
pub mod pool;
#[cfg(feature = "master")]
pub mod master;
#[cfg(feature = "slave")]
pub mod slave;
#[cfg(feature = "loopback")]
pub mod loopback;
