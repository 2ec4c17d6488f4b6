//! EMV contactless Level-2 entry point.
//!
//! The host-side control plane between a contactless RF frontend and the
//! card-brand kernels: given a tap it pre-evaluates the configured
//! combinations, activates the protocol, walks the PPSE directory, settles
//! on one {AID, kernel id} combination and hands the transaction to the
//! matching kernel — per EMV Contactless Book A and Book B. The BER-TLV
//! codec everything is built on lives in [`tlv`].
//!
//! The RF layer, the kernels themselves and the cardholder UI are external
//! collaborators behind the [`hal::Hal`] and [`kernel::Kernel`] traits.

pub mod apdu;
pub mod bcd;
pub mod config;
pub mod dol;
pub mod entrypoint;
pub mod errors;
pub mod hal;
pub mod kernel;
pub mod outcome;
pub mod tags;
pub mod tlv;

pub use errors::{Error, Result};
