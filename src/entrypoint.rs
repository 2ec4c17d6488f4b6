//! The contactless entry point state machine.
//!
//! This is the control plane of EMV Contactless Book B: given an activated
//! transaction it pre-evaluates which configured {AID, kernel id}
//! combinations are eligible, powers the field, walks the PPSE directory of
//! the presented card, settles on a single combination and hands the
//! transaction to the matching kernel. The kernel's outcome is surfaced to
//! the caller; a `start` embedded in it is an instruction for the *caller*
//! to re-activate, the entry point never loops on itself.
//!
//! The six states are driven by [`EntryPoint::activate`] until `Done` or an
//! error. Communication errors during protocol activation or combination
//! selection fall back to protocol activation; a SELECT (AID) refused by
//! the card only costs that one candidate.

use tracing::{debug, trace, trace_span, warn};

use crate::apdu::{self, Status};
use crate::config::{Autorun, Combination, Config, PreprocIndicators, TerminalData, TxnType};
use crate::hal::{Hal, PollEvent};
use crate::kernel::{Kernel, KernelParms, KernelRegistry};
use crate::outcome::{MessageIdentifier, Outcome, Start, UiRequest, UiStatus};
use crate::tags;
use crate::tlv::Tlv;
use crate::{Error, Result};

pub const DF_NAME_PPSE: &[u8] = b"2PAY.SYS.DDF01";

// Terminal Transaction Qualifiers, tag 9F66.
pub const TTQ_B1_MAG_STRIPE_MODE_SUPPORTED: u8 = 0x80;
pub const TTQ_B1_EMV_MODE_SUPPORTED: u8 = 0x20;
pub const TTQ_B1_EMV_CONTACT_CHIP_SUPPORTED: u8 = 0x10;
pub const TTQ_B1_OFFLINE_ONLY_READER: u8 = 0x08;
pub const TTQ_B1_ONLINE_PIN_SUPPORTED: u8 = 0x04;
pub const TTQ_B1_SIGNATURE_SUPPORTED: u8 = 0x02;
pub const TTQ_B1_ODA_FOR_ONLINE_AUTH_SUPPORTED: u8 = 0x01;
pub const TTQ_B2_ONLINE_CRYPTOGRAM_REQUIRED: u8 = 0x80;
pub const TTQ_B2_CVM_REQUIRED: u8 = 0x40;
pub const TTQ_B2_OFFLINE_PIN_SUPPORTED: u8 = 0x20;
pub const TTQ_B3_ISSUER_UPDATE_PROCESSING_SUPPORTED: u8 = 0x80;
pub const TTQ_B3_CONSUMER_DEVICE_CVM_SUPPORTED: u8 = 0x40;

const ISO4217_USD: [u8; 2] = [0x08, 0x40];
const ISO4217_EUR: [u8; 2] = [0x09, 0x78];

fn is_currency_supported(currency: &[u8; 2]) -> bool {
    *currency == ISO4217_USD || *currency == ISO4217_EUR
}

/// Minor units per major unit, for the supported currencies.
fn unit_of_currency(_currency: &[u8; 2]) -> u64 {
    100
}

/// Per-activation transaction parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub txn_type: TxnType,
    pub amount_authorized: u64,
    pub amount_other: u64,
    /// ISO 4217 numeric currency code.
    pub currency: [u8; 2],
    /// Fresh random per transaction.
    pub unpredictable_number: u32,
    /// True when this activation re-enters after an outcome asked for a
    /// restart.
    pub restart: bool,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            txn_type: TxnType::Purchase,
            amount_authorized: 0,
            amount_other: 0,
            currency: [0; 2],
            unpredictable_number: 0,
            restart: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preprocessing,
    ProtocolActivation,
    CombinationSelection,
    FinalCombinationSelection,
    KernelActivation,
    OutcomeProcessing,
    Done,
}

/// One PPSE directory entry that matched a combination.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    adf_name: Vec<u8>,
    /// Application priority indicator, low nibble; 0 means "lowest".
    priority: u8,
    extended_selection: Vec<u8>,
    /// 0-based position of the directory entry in the PPSE FCI.
    order: usize,
    /// Index into the active combination set.
    combination: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct PpseDirEntry {
    adf_name: Vec<u8>,
    application_label: Vec<u8>,
    priority: u8,
    kernel_identifier: Vec<u8>,
    extended_selection: Vec<u8>,
}

/// The entry point proper. Holds borrowed handles to the RF frontend and
/// the registered kernels; both must outlive it. One instance services one
/// transaction at a time.
pub struct EntryPoint<'e> {
    hal: &'e mut dyn Hal,
    kernels: KernelRegistry<'e>,
    combination_sets: [Vec<Combination>; crate::config::NUM_TXN_TYPES],
    autorun: Option<Autorun>,
    terminal_data: Option<TerminalData>,
    candidates: Vec<Candidate>,
    txn: Transaction,
    start: Start,
    selected_fci: Vec<u8>,
    selected_sw: Status,
    selected_kernel_id: Vec<u8>,
    outcome: Outcome,
    state: State,
}

impl<'e> EntryPoint<'e> {
    pub fn new(hal: &'e mut dyn Hal) -> Self {
        Self {
            hal,
            kernels: KernelRegistry::new(),
            combination_sets: Default::default(),
            autorun: None,
            terminal_data: None,
            candidates: Vec::new(),
            txn: Transaction::default(),
            start: Start::A,
            selected_fci: Vec::new(),
            selected_sw: Status(0x00, 0x00),
            selected_kernel_id: Vec::new(),
            outcome: Outcome::default(),
            state: State::Done,
        }
    }

    /// Decodes and installs a configuration blob.
    pub fn configure(&mut self, blob: &[u8]) -> Result<()> {
        let config = Config::parse(blob)?;
        self.combination_sets = config.combination_sets;
        self.autorun = config.autorun;
        self.terminal_data = config.terminal_data;
        Ok(())
    }

    pub fn register_kernel(&mut self, kernel_id: &[u8], kernel: &'e mut dyn Kernel) {
        self.kernels.register(kernel_id, kernel);
    }

    pub fn autorun(&self) -> Option<&Autorun> {
        self.autorun.as_ref()
    }

    pub fn terminal_data(&self) -> Option<&TerminalData> {
        self.terminal_data.as_ref()
    }

    /// Runs one activation from `start` to completion.
    ///
    /// Start A enters preprocessing, Start B skips straight to protocol
    /// activation (autorun readers with a fixed TTQ), Start D re-enters
    /// kernel activation on the retained candidate. Start C is internal to
    /// combination selection and not a valid way in.
    pub fn activate(&mut self, start: Start, txn: Transaction) -> Result<Outcome> {
        let span = trace_span!("activate", ?start, txn_type = ?txn.txn_type);
        let _enter = span.enter();

        self.state = match start {
            Start::A => State::Preprocessing,
            Start::B => State::ProtocolActivation,
            Start::D => State::KernelActivation,
            Start::C => return Err(Error::InvalidArg("cannot activate at Start C")),
        };
        self.start = start;
        self.txn = txn;

        let mut entered_at_b = start == Start::B;
        loop {
            match self.state {
                State::Preprocessing => self.preprocessing()?,
                State::ProtocolActivation => {
                    self.protocol_activation(entered_at_b)?;
                    entered_at_b = false;
                }
                State::CombinationSelection => self.combination_selection()?,
                State::FinalCombinationSelection => self.final_combination_selection()?,
                State::KernelActivation => self.kernel_activation()?,
                State::OutcomeProcessing => self.outcome_processing(),
                State::Done => break,
            }
        }

        Ok(self.outcome.clone())
    }

    /// Book B section 3.1: per-combination limit arithmetic on the amount.
    fn preprocessing(&mut self) -> Result<()> {
        let span = trace_span!("preprocessing");
        let _enter = span.enter();

        let amount = self.txn.amount_authorized;
        let mut any_allowed = false;

        for combination in self.combination_sets[self.txn.txn_type.index()].iter_mut() {
            let cfg = &combination.config;
            let indicators = &mut combination.indicators;
            *indicators = PreprocIndicators::default();

            // Working copy of the TTQ, with 'online cryptogram required'
            // and 'CVM required' cleared; the checks below turn them back
            // on as needed.
            if let Some(ttq) = cfg.ttq {
                indicators.ttq = ttq;
                indicators.ttq[1] &= !(TTQ_B2_ONLINE_CRYPTOGRAM_REQUIRED | TTQ_B2_CVM_REQUIRED);
            }

            if cfg.status_check_support == Some(true)
                && amount == unit_of_currency(&self.txn.currency)
            {
                indicators.status_check_requested = true;
            }

            if amount == 0 {
                if cfg.zero_amount_allowed == Some(false) {
                    indicators.ctls_app_not_allowed = true;
                } else {
                    indicators.zero_amount = true;
                }
            }

            if let Some(limit) = cfg.reader_ctls_txn_limit {
                if amount >= limit {
                    indicators.txn_limit_exceeded = true;
                    indicators.ctls_app_not_allowed = true;
                }
            }

            if let Some(limit) = cfg.reader_ctls_floor_limit {
                if amount > limit {
                    indicators.floor_limit_exceeded = true;
                }
            } else if let Some(limit) = cfg.terminal_floor_limit {
                if amount > limit {
                    indicators.floor_limit_exceeded = true;
                }
            }

            if let Some(limit) = cfg.reader_cvm_reqd_limit {
                if amount >= limit {
                    indicators.cvm_reqd_limit_exceeded = true;
                }
            }

            if cfg.ttq.is_some() {
                if indicators.floor_limit_exceeded || indicators.status_check_requested {
                    indicators.ttq[1] |= TTQ_B2_ONLINE_CRYPTOGRAM_REQUIRED;
                }
                if indicators.zero_amount {
                    if indicators.ttq[0] & TTQ_B1_OFFLINE_ONLY_READER != 0 {
                        indicators.ctls_app_not_allowed = true;
                    } else {
                        indicators.ttq[1] |= TTQ_B2_ONLINE_CRYPTOGRAM_REQUIRED;
                    }
                }
                if indicators.cvm_reqd_limit_exceeded {
                    indicators.ttq[1] |= TTQ_B2_CVM_REQUIRED;
                }
            }

            trace!(
                aid = %hex::encode_upper(&combination.aid),
                ?indicators,
                "combination preprocessed"
            );
            if !indicators.ctls_app_not_allowed {
                any_allowed = true;
            }
        }

        if !any_allowed {
            debug!("no combination allowed for this transaction");
            self.outcome = Outcome::try_another_interface();
            self.state = State::OutcomeProcessing;
            return Ok(());
        }

        if !is_currency_supported(&self.txn.currency) {
            return Err(Error::UnsupportedCurrencyCode(self.txn.currency));
        }

        self.state = State::ProtocolActivation;
        Ok(())
    }

    /// Book B section 3.2: field power-up, cardholder prompt, collision
    /// handling.
    fn protocol_activation(&mut self, entered_at_b: bool) -> Result<()> {
        let span = trace_span!("protocol_activation");
        let _enter = span.enter();

        if !self.txn.restart {
            // Coming in at Start B there was no preprocessing pass; the
            // indicators still get a fresh TTQ copy, this time verbatim.
            if entered_at_b {
                for combination in self.combination_sets[self.txn.txn_type.index()].iter_mut() {
                    combination.indicators = PreprocIndicators::default();
                    if let Some(ttq) = combination.config.ttq {
                        combination.indicators.ttq = ttq;
                    }
                }
            }
            self.candidates.clear();
        }

        match (self.txn.restart, self.outcome.ui_request_on_restart.clone()) {
            (true, Some(request)) => self.hal.ui_request(&request),
            _ => self.hal.ui_request(&UiRequest::new(
                MessageIdentifier::PresentCard,
                UiStatus::ReadyToRead,
            )),
        }

        self.hal.start_polling()?;

        let mut collision = false;
        loop {
            match self.hal.wait_for_card()? {
                PollEvent::CardDetected => break,
                PollEvent::Collision => {
                    self.hal.ui_request(&UiRequest::new(
                        MessageIdentifier::PresentOneCardOnly,
                        UiStatus::ProcessingError,
                    ));
                    collision = true;
                }
                PollEvent::Continue => {
                    if collision {
                        self.hal.ui_request(&UiRequest::new(
                            MessageIdentifier::PresentOneCardOnly,
                            UiStatus::ReadyToRead,
                        ));
                        collision = false;
                    }
                }
            }
        }

        self.state = State::CombinationSelection;
        Ok(())
    }

    /// Book B section 3.3, steps 1 and 2: SELECT the PPSE and build the
    /// candidate list.
    fn combination_selection(&mut self) -> Result<()> {
        let span = trace_span!("combination_selection");
        let _enter = span.enter();

        let (fci, sw) = match apdu::select_by_name(self.hal, DF_NAME_PPSE) {
            Ok(response) => response,
            Err(Error::RfCommunication) | Err(Error::CardProtocol(_)) => {
                warn!("PPSE selection failed, back to protocol activation");
                self.state = State::ProtocolActivation;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !sw.is_ok() {
            debug!(%sw, "PPSE selection refused");
            self.state = State::FinalCombinationSelection;
            return Ok(());
        }

        let entries = parse_ppse(&fci)?;
        if entries.is_empty() {
            debug!("no directory entries in the PPSE");
            self.state = State::FinalCombinationSelection;
            return Ok(());
        }

        self.candidates.clear();
        let set = &self.combination_sets[self.txn.txn_type.index()];
        for (index, combination) in set.iter().enumerate() {
            if combination.indicators.ctls_app_not_allowed {
                continue;
            }
            for (order, entry) in entries.iter().enumerate() {
                if !is_combination_candidate(combination, entry) {
                    continue;
                }
                debug!(
                    adf = %hex::encode_upper(&entry.adf_name),
                    label = %String::from_utf8_lossy(&entry.application_label),
                    order,
                    "candidate"
                );
                self.candidates.push(Candidate {
                    adf_name: entry.adf_name.clone(),
                    priority: entry.priority,
                    extended_selection: entry.extended_selection.clone(),
                    order,
                    combination: index,
                });
            }
        }

        // Ascending by priority, so the selected candidate is the tail.
        // Zero priority is the floor; among the rest a numerically smaller
        // indicator ranks higher. Equal priorities order by PPSE position,
        // earlier entries last.
        self.candidates.sort_by(|a, b| {
            priority_rank(a.priority)
                .cmp(&priority_rank(b.priority))
                .then(b.order.cmp(&a.order))
        });

        trace!(candidates = self.candidates.len(), "candidate list built");
        self.state = State::FinalCombinationSelection;
        Ok(())
    }

    /// Book B section 3.3, step 3: SELECT the highest-priority candidate,
    /// dropping refused ones.
    fn final_combination_selection(&mut self) -> Result<()> {
        let span = trace_span!("final_combination_selection");
        let _enter = span.enter();

        let candidate = match self.candidates.last() {
            None => {
                debug!("candidate list empty, ending application");
                self.outcome = Outcome::end_application();
                self.state = State::OutcomeProcessing;
                return Ok(());
            }
            Some(candidate) => candidate.clone(),
        };
        let combination =
            &self.combination_sets[self.txn.txn_type.index()][candidate.combination];

        let mut select_data = candidate.adf_name.clone();
        if combination.config.ext_selection_support == Some(true)
            && !candidate.extended_selection.is_empty()
        {
            select_data.extend_from_slice(&candidate.extended_selection);
        }

        let (fci, sw) = match apdu::select_by_name(self.hal, &select_data) {
            Ok(response) => response,
            Err(Error::RfCommunication) | Err(Error::CardProtocol(_)) => {
                warn!("SELECT (AID) failed, back to protocol activation");
                self.state = State::ProtocolActivation;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !sw.is_ok() {
            debug!(%sw, adf = %hex::encode_upper(&candidate.adf_name), "candidate refused");
            self.candidates.pop();
            return Ok(());
        }

        // TODO: swap kernel 3 for kernel 1 on Visa AIDs whose FCI carries
        // no PDOL or a PDOL without tag 9F66, dropping the candidate when
        // kernel 1 is not registered.

        self.selected_fci = fci;
        self.selected_sw = sw;
        self.state = State::KernelActivation;
        Ok(())
    }

    /// Book B section 3.4: hand the transaction to the selected kernel.
    fn kernel_activation(&mut self) -> Result<()> {
        let span = trace_span!("kernel_activation");
        let _enter = span.enter();

        let Self {
            hal,
            kernels,
            combination_sets,
            candidates,
            txn,
            start,
            selected_fci,
            selected_sw,
            selected_kernel_id,
            ..
        } = self;

        let candidate = match candidates.last() {
            None => return Err(Error::InvalidArg("no candidate retained for activation")),
            Some(candidate) => candidate,
        };
        let combination = &combination_sets[txn.txn_type.index()][candidate.combination];
        *selected_kernel_id = combination.kernel_id.clone();

        let parms = KernelParms {
            restart: txn.restart,
            start: *start,
            txn_type: txn.txn_type,
            amount_authorized: txn.amount_authorized,
            amount_other: txn.amount_other,
            currency: txn.currency,
            unpredictable_number: txn.unpredictable_number,
            kernel_id: selected_kernel_id,
            fci: selected_fci,
            sw: *selected_sw,
            preproc_indicators: &combination.indicators,
        };

        let kernel = kernels
            .lookup(&combination.kernel_id)
            .ok_or_else(|| Error::NoKernel(hex::encode_upper(&combination.kernel_id)))?;

        debug!(kernel_id = %hex::encode_upper(&combination.kernel_id), "kernel activated");
        let outcome = kernel.activate(&mut **hal, &parms)?;
        self.outcome = outcome;
        self.state = State::OutcomeProcessing;
        Ok(())
    }

    fn outcome_processing(&mut self) {
        debug!(kind = ?self.outcome.kind, start = ?self.outcome.start, "outcome");
        self.state = State::Done;
    }
}

/// Lowest rank sorts first; the selected candidate is the maximum.
fn priority_rank(priority: u8) -> u8 {
    if priority == 0 {
        0
    } else {
        16 - priority
    }
}

/// Default requested kernel id for an AID without a kernel identifier,
/// keyed on the registered application provider.
fn rid_to_kernel_id(aid: &[u8]) -> u8 {
    const RIDS: [([u8; 5], u8); 6] = [
        ([0xA0, 0x00, 0x00, 0x00, 0x04], 0x02), // Mastercard
        ([0xA0, 0x00, 0x00, 0x00, 0x03], 0x03), // Visa
        ([0xA0, 0x00, 0x00, 0x00, 0x25], 0x04), // American Express
        ([0xA0, 0x00, 0x00, 0x00, 0x65], 0x05), // JCB
        ([0xA0, 0x00, 0x00, 0x00, 0x15], 0x06), // Discover
        ([0xA0, 0x00, 0x00, 0x03, 0x33], 0x07), // UnionPay
    ];
    RIDS.iter()
        .find(|(rid, _)| aid.starts_with(rid))
        .map(|(_, kernel)| *kernel)
        .unwrap_or(0)
}

/// The requested kernel id a directory entry asks for, per the format of
/// its Kernel Identifier (tag 9F2A). `None` skips the entry.
fn requested_kernel_id(combination: &Combination, entry: &PpseDirEntry) -> Option<Vec<u8>> {
    let kid = &entry.kernel_identifier;
    if kid.is_empty() {
        return Some(vec![rid_to_kernel_id(&combination.aid)]);
    }
    match kid[0] & 0xC0 {
        // b8b7 of 00 or 01: the single byte is the requested kernel id.
        0x00 | 0x40 => Some(vec![kid[0]]),
        _ => {
            if kid.len() < 3 {
                None
            } else if kid[0] & 0x3F != 0 {
                // Short kernel id set: b8b7 || short id || extended id.
                Some(kid[..3].to_vec())
            } else {
                // Short kernel id of zero: the full identifier applies.
                Some(kid.clone())
            }
        }
    }
}

/// The matching predicate of Book B, section 3.3.2.5.
fn is_combination_candidate(combination: &Combination, entry: &PpseDirEntry) -> bool {
    // An ADF name shorter than a RID is not a legal AID.
    if entry.adf_name.len() < 5 {
        return false;
    }
    // Full or partial match: the AID is a prefix of the ADF name.
    if !entry.adf_name.starts_with(&combination.aid) {
        return false;
    }
    match requested_kernel_id(combination, entry) {
        None => false,
        // A requested kernel id of zero accepts whatever the reader has.
        Some(requested) => requested[0] == 0 || requested == combination.kernel_id,
    }
}

/// Pulls the directory entries out of a PPSE FCI.
fn parse_ppse(fci: &[u8]) -> Result<Vec<PpseDirEntry>> {
    let tree = Tlv::parse(fci).map_err(|_| Error::CardProtocol("unparseable PPSE FCI"))?;

    let mut entries = Vec::new();
    let mut cur = tree
        .find(tree.head(), tags::FCI_TEMPLATE)
        .and_then(|node| tree.find(tree.child(node), tags::FCI_PROPRIETARY_TEMPLATE))
        .and_then(|node| tree.find(tree.child(node), tags::FCI_ISSUER_DISCRETIONARY_DATA))
        .and_then(|node| tree.find(tree.child(node), tags::DIRECTORY_ENTRY));

    while let Some(dir_entry) = cur {
        let fields = tree.child(dir_entry);
        let mut entry = PpseDirEntry::default();
        if let Some(node) = tree.find(fields, tags::ADF_NAME) {
            entry.adf_name = tree.value(node).to_vec();
        }
        if let Some(node) = tree.find(fields, tags::APPLICATION_LABEL) {
            entry.application_label = tree.value(node).to_vec();
        }
        if let Some(node) = tree.find(fields, tags::APPLICATION_PRIORITY_INDICATOR) {
            entry.priority = tree.value(node).first().copied().unwrap_or(0) & 0x0F;
        }
        if let Some(node) = tree.find(fields, tags::KERNEL_IDENTIFIER) {
            entry.kernel_identifier = tree.value(node).to_vec();
        }
        if let Some(node) = tree.find(fields, tags::EXTENDED_SELECTION) {
            entry.extended_selection = tree.value(node).to_vec();
        }
        entries.push(entry);

        cur = tree.find(tree.next(dir_entry), tags::DIRECTORY_ENTRY);
    }

    Ok(entries)
}
