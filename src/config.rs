//! Terminal configuration decoding.
//!
//! The terminal hands the entry point one BER-TLV blob rooted at the
//! proprietary Configuration tag. It holds one or more combination sets —
//! each naming the transaction types it applies to, the {AID, kernel id}
//! combinations it offers, and the shared limits and flags — plus the
//! optional autorun and terminal data blocks. Everything is converted to
//! owned typed structs here; no TLV tree survives configuration.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::trace;

use crate::bcd;
use crate::tags::cfg;
use crate::tlv::Tlv;
use crate::{Error, Result};

pub const NUM_TXN_TYPES: usize = 4;

/// Transaction types the entry point can be activated for. The discriminants
/// are the op-codes of EMV tag 9C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TxnType {
    Purchase = 0x00,
    CashAdvance = 0x01,
    PurchaseWithCashback = 0x09,
    Refund = 0x20,
}

impl TxnType {
    pub const ALL: [TxnType; NUM_TXN_TYPES] = [
        TxnType::Purchase,
        TxnType::CashAdvance,
        TxnType::PurchaseWithCashback,
        TxnType::Refund,
    ];

    pub fn from_op_code(op: u8) -> Result<Self> {
        Self::try_from(op).map_err(|_| Error::UnsupportedTransactionType(op))
    }

    pub fn op_code(self) -> u8 {
        self.into()
    }

    /// Position in per-transaction-type tables.
    pub fn index(self) -> usize {
        match self {
            TxnType::Purchase => 0,
            TxnType::CashAdvance => 1,
            TxnType::PurchaseWithCashback => 2,
            TxnType::Refund => 3,
        }
    }
}

/// Limits and flags shared by all combinations of a set. `None` means the
/// field was absent from the configuration, which several preprocessing
/// rules treat differently from a disabled flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CombinationConfig {
    pub status_check_support: Option<bool>,
    pub zero_amount_allowed: Option<bool>,
    pub ext_selection_support: Option<bool>,
    pub reader_ctls_txn_limit: Option<u64>,
    pub reader_ctls_floor_limit: Option<u64>,
    pub terminal_floor_limit: Option<u64>,
    pub reader_cvm_reqd_limit: Option<u64>,
    pub ttq: Option<[u8; 4]>,
}

/// Preprocessing results for one combination, computed fresh per activation
/// and handed to the kernel on activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocIndicators {
    pub status_check_requested: bool,
    pub ctls_app_not_allowed: bool,
    pub zero_amount: bool,
    pub cvm_reqd_limit_exceeded: bool,
    pub floor_limit_exceeded: bool,
    pub txn_limit_exceeded: bool,
    /// Working copy of the configured TTQ.
    pub ttq: [u8; 4],
}

/// One {AID, kernel id} combination eligible for selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Combination {
    pub aid: Vec<u8>,
    pub kernel_id: Vec<u8>,
    pub config: CombinationConfig,
    /// Transient, reset at each activation.
    pub indicators: PreprocIndicators,
}

/// Fixed transaction to run unattended, activated at Start B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Autorun {
    pub txn_type: TxnType,
    pub amount_authorized: u64,
}

/// The standard terminal data elements, as configured for this reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalData {
    pub acquirer_identifier: [u8; 6],
    pub merchant_category_code: [u8; 2],
    pub merchant_identifier: Vec<u8>,
    pub terminal_country_code: [u8; 2],
    pub terminal_identification: Vec<u8>,
    pub terminal_type: u8,
    pub pos_entry_mode: u8,
    pub additional_terminal_capabilities: [u8; 5],
    pub terminal_capabilities: [u8; 3],
    pub merchant_name_and_location: Vec<u8>,
}

/// Fully decoded entry point configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub combination_sets: [Vec<Combination>; NUM_TXN_TYPES],
    pub autorun: Option<Autorun>,
    pub terminal_data: Option<TerminalData>,
}

impl Config {
    pub fn combinations(&self, txn_type: TxnType) -> &[Combination] {
        &self.combination_sets[txn_type.index()]
    }

    /// Decodes a configuration blob rooted at the Configuration tag.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let tree =
            Tlv::parse(blob).map_err(|_| Error::Syntax("configuration is not valid TLV"))?;
        let root = tree
            .find(tree.head(), cfg::CONFIGURATION)
            .ok_or(Error::Syntax("missing configuration template"))?;

        let mut config = Config::default();
        let mut cur = tree.child(root);
        while let Some(node) = cur {
            match tree.tag(node).as_bytes() {
                t if t == cfg::COMBINATION_SET => parse_combination_set(&tree, node, &mut config)?,
                t if t == cfg::AUTORUN => config.autorun = Some(parse_autorun(&tree, node)?),
                t if t == cfg::TERMINAL_DATA => {
                    config.terminal_data = Some(parse_terminal_data(&tree, node)?)
                }
                _ => return Err(Error::Syntax("unexpected tag in configuration")),
            }
            cur = tree.next(node);
        }

        trace!(
            purchase = config.combination_sets[0].len(),
            cash_advance = config.combination_sets[1].len(),
            cashback = config.combination_sets[2].len(),
            refund = config.combination_sets[3].len(),
            "configuration decoded"
        );
        Ok(config)
    }
}

fn flag(tree: &Tlv, node: crate::tlv::NodeId) -> Result<bool> {
    match tree.value(node) {
        [b] => Ok(*b != 0),
        _ => Err(Error::Syntax("flag must be a single byte")),
    }
}

fn limit(tree: &Tlv, node: crate::tlv::NodeId) -> Result<u64> {
    let value = tree.value(node);
    if value.len() != 6 {
        return Err(Error::Syntax("limit must be 6 bytes of BCD"));
    }
    bcd::bcd_to_u64(value).map_err(|_| Error::Syntax("limit is not valid BCD"))
}

fn parse_combination_set(tree: &Tlv, set: crate::tlv::NodeId, config: &mut Config) -> Result<()> {
    let mut shared = CombinationConfig::default();
    let mut txn_types: Option<Vec<TxnType>> = None;
    let mut combinations = Vec::new();

    let mut cur = tree.child(set);
    while let Some(node) = cur {
        match tree.tag(node).as_bytes() {
            t if t == cfg::TRANSACTION_TYPES => {
                let value = tree.value(node);
                if value.is_empty() || value.len() > NUM_TXN_TYPES {
                    return Err(Error::Syntax("transaction types must be 1 to 4 bytes"));
                }
                let mut types = Vec::with_capacity(value.len());
                for op in value {
                    types.push(
                        TxnType::from_op_code(*op)
                            .map_err(|_| Error::Syntax("unknown transaction type"))?,
                    );
                }
                txn_types = Some(types);
            }
            t if t == cfg::COMBINATION => combinations.push(parse_combination(tree, node)?),
            t if t == cfg::STATUS_CHECK_SUPPORTED => {
                shared.status_check_support = Some(flag(tree, node)?)
            }
            t if t == cfg::ZERO_AMOUNT_ALLOWED => {
                shared.zero_amount_allowed = Some(flag(tree, node)?)
            }
            t if t == cfg::EXT_SELECTION_SUPPORTED => {
                shared.ext_selection_support = Some(flag(tree, node)?)
            }
            t if t == cfg::READER_CTLS_TXN_LIMIT => {
                shared.reader_ctls_txn_limit = Some(limit(tree, node)?)
            }
            t if t == cfg::READER_CTLS_FLOOR_LIMIT => {
                shared.reader_ctls_floor_limit = Some(limit(tree, node)?)
            }
            t if t == cfg::TERMINAL_FLOOR_LIMIT => {
                shared.terminal_floor_limit = Some(limit(tree, node)?)
            }
            t if t == cfg::READER_CVM_REQUIRED_LIMIT => {
                shared.reader_cvm_reqd_limit = Some(limit(tree, node)?)
            }
            t if t == cfg::TTQ => {
                let value = tree.value(node);
                shared.ttq = Some(
                    value
                        .try_into()
                        .map_err(|_| Error::Syntax("TTQ must be 4 bytes"))?,
                );
            }
            _ => return Err(Error::Syntax("unexpected tag in combination set")),
        }
        cur = tree.next(node);
    }

    let txn_types = txn_types.ok_or(Error::Syntax("combination set without transaction types"))?;
    for txn_type in txn_types {
        for combination in &combinations {
            config.combination_sets[txn_type.index()].push(Combination {
                config: shared,
                ..combination.clone()
            });
        }
    }
    Ok(())
}

fn parse_combination(tree: &Tlv, comb: crate::tlv::NodeId) -> Result<Combination> {
    let mut aid = None;
    let mut kernel_id = None;

    let mut cur = tree.child(comb);
    while let Some(node) = cur {
        match tree.tag(node).as_bytes() {
            t if t == cfg::AID => {
                let value = tree.value(node);
                if value.is_empty() || value.len() > 16 {
                    return Err(Error::Syntax("AID must be 1 to 16 bytes"));
                }
                aid = Some(value.to_vec());
            }
            t if t == cfg::KERNEL_ID => {
                let value = tree.value(node);
                if value.is_empty() || value.len() > 8 {
                    return Err(Error::Syntax("kernel id must be 1 to 8 bytes"));
                }
                kernel_id = Some(value.to_vec());
            }
            _ => return Err(Error::Syntax("unexpected tag in combination")),
        }
        cur = tree.next(node);
    }

    Ok(Combination {
        aid: aid.ok_or(Error::Syntax("combination without AID"))?,
        kernel_id: kernel_id.ok_or(Error::Syntax("combination without kernel id"))?,
        ..Combination::default()
    })
}

fn parse_autorun(tree: &Tlv, autorun: crate::tlv::NodeId) -> Result<Autorun> {
    let mut txn_type = None;
    let mut amount = None;

    let mut cur = tree.child(autorun);
    while let Some(node) = cur {
        match tree.tag(node).as_bytes() {
            t if t == cfg::AUTORUN_TRANSACTION_TYPE => match tree.value(node) {
                [op] => {
                    txn_type = Some(
                        TxnType::from_op_code(*op)
                            .map_err(|_| Error::Syntax("unknown autorun transaction type"))?,
                    )
                }
                _ => return Err(Error::Syntax("autorun transaction type must be one byte")),
            },
            t if t == cfg::AUTORUN_AMOUNT_AUTHORIZED => amount = Some(limit(tree, node)?),
            _ => return Err(Error::Syntax("unexpected tag in autorun block")),
        }
        cur = tree.next(node);
    }

    Ok(Autorun {
        txn_type: txn_type.ok_or(Error::Syntax("autorun without transaction type"))?,
        amount_authorized: amount.ok_or(Error::Syntax("autorun without amount"))?,
    })
}

fn exact<const N: usize>(value: &[u8], what: &'static str) -> Result<[u8; N]> {
    value.try_into().map_err(|_| Error::Syntax(what))
}

fn parse_terminal_data(tree: &Tlv, data: crate::tlv::NodeId) -> Result<TerminalData> {
    use crate::tags;

    let mut out = TerminalData::default();
    let mut cur = tree.child(data);
    while let Some(node) = cur {
        let value = tree.value(node);
        match tree.tag(node).as_bytes() {
            t if t == tags::ACQUIRER_IDENTIFIER => {
                out.acquirer_identifier = exact(value, "acquirer identifier must be 6 bytes")?
            }
            t if t == tags::MERCHANT_CATEGORY_CODE => {
                out.merchant_category_code = exact(value, "merchant category code must be 2 bytes")?
            }
            t if t == tags::MERCHANT_IDENTIFIER => out.merchant_identifier = value.to_vec(),
            t if t == tags::TERMINAL_COUNTRY_CODE => {
                out.terminal_country_code = exact(value, "terminal country code must be 2 bytes")?
            }
            t if t == tags::TERMINAL_IDENTIFICATION => {
                out.terminal_identification = value.to_vec()
            }
            t if t == tags::TERMINAL_TYPE => match value {
                [b] => out.terminal_type = *b,
                _ => return Err(Error::Syntax("terminal type must be one byte")),
            },
            t if t == tags::POS_ENTRY_MODE => match value {
                [b] => out.pos_entry_mode = *b,
                _ => return Err(Error::Syntax("POS entry mode must be one byte")),
            },
            t if t == tags::ADDITIONAL_TERMINAL_CAPABILITIES => {
                out.additional_terminal_capabilities =
                    exact(value, "additional terminal capabilities must be 5 bytes")?
            }
            t if t == tags::TERMINAL_CAPABILITIES => {
                out.terminal_capabilities = exact(value, "terminal capabilities must be 3 bytes")?
            }
            t if t == tags::MERCHANT_NAME_AND_LOCATION => {
                out.merchant_name_and_location = value.to_vec()
            }
            _ => return Err(Error::Syntax("unexpected tag in terminal data")),
        }
        cur = tree.next(node);
    }
    Ok(out)
}
