//! Capability contract towards brand kernels, and the registry that maps
//! kernel id bytes to registered handles.
//!
//! A kernel is the Book C state machine that takes over once the entry
//! point has settled on a combination. The entry point neither knows nor
//! cares what happens inside; it hands over the preprocessing indicators,
//! the SELECT response and the transaction parameters, and takes back an
//! [`Outcome`].

use tracing::{trace, warn};

use crate::apdu::Status;
use crate::config::{PreprocIndicators, TxnType};
use crate::hal::Hal;
use crate::outcome::{Outcome, Start};
use crate::Result;

/// Everything the entry point makes available at kernel activation.
#[derive(Debug, Clone, Copy)]
pub struct KernelParms<'a> {
    pub restart: bool,
    pub start: Start,
    pub txn_type: TxnType,
    pub amount_authorized: u64,
    pub amount_other: u64,
    /// ISO 4217 numeric currency code.
    pub currency: [u8; 2],
    pub unpredictable_number: u32,
    /// Kernel id of the selected combination.
    pub kernel_id: &'a [u8],
    /// FCI and status word from the final SELECT (AID) response.
    pub fci: &'a [u8],
    pub sw: Status,
    pub preproc_indicators: &'a PreprocIndicators,
}

pub trait Kernel {
    /// Hands the kernel its slice of the terminal configuration.
    fn configure(&mut self, blob: &[u8]) -> Result<()>;

    /// Runs the transaction. Invoked exactly once per activation; the
    /// returned outcome supersedes whatever the entry point held.
    fn activate(&mut self, hal: &mut dyn Hal, parms: &KernelParms) -> Result<Outcome>;
}

/// Registered kernels, looked up by their id bytes.
///
/// Matching is byte-wise over the full id (same length, same value).
/// Duplicate registrations are accepted, but only the first one is ever
/// reachable.
#[derive(Default)]
pub struct KernelRegistry<'a> {
    kernels: Vec<(Vec<u8>, &'a mut dyn Kernel)>,
}

impl<'a> KernelRegistry<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kernel_id: &[u8], kernel: &'a mut dyn Kernel) {
        trace!(kernel_id = %hex::encode_upper(kernel_id), "kernel registered");
        self.kernels.push((kernel_id.to_vec(), kernel));
    }

    pub fn lookup<'s>(&'s mut self, kernel_id: &[u8]) -> Option<&'s mut (dyn Kernel + 'a)> {
        let found = self
            .kernels
            .iter_mut()
            .find(|(id, _)| id.as_slice() == kernel_id);
        if found.is_none() {
            warn!(kernel_id = %hex::encode_upper(kernel_id), "no kernel for id");
        }
        found.map(move |(_, kernel)| &mut **kernel)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
