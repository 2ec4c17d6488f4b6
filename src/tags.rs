//! Tag constants: the EMV data elements the entry point touches, plus the
//! proprietary tags of the configuration blob.
//!
//! All data elements are defined in EMV Book 3, Annex A.

pub const ADF_NAME: &[u8] = &[0x4F];
pub const APPLICATION_LABEL: &[u8] = &[0x50];
pub const DIRECTORY_ENTRY: &[u8] = &[0x61];
pub const FCI_TEMPLATE: &[u8] = &[0x6F];
pub const DF_NAME: &[u8] = &[0x84];
pub const APPLICATION_PRIORITY_INDICATOR: &[u8] = &[0x87];
pub const TRANSACTION_TYPE: &[u8] = &[0x9C];
pub const ACQUIRER_IDENTIFIER: &[u8] = &[0x9F, 0x01];
pub const AMOUNT_AUTHORIZED: &[u8] = &[0x9F, 0x02];
pub const AMOUNT_OTHER: &[u8] = &[0x9F, 0x03];
pub const MERCHANT_CATEGORY_CODE: &[u8] = &[0x9F, 0x15];
pub const MERCHANT_IDENTIFIER: &[u8] = &[0x9F, 0x16];
pub const TERMINAL_COUNTRY_CODE: &[u8] = &[0x9F, 0x1A];
pub const TERMINAL_IDENTIFICATION: &[u8] = &[0x9F, 0x1C];
pub const EXTENDED_SELECTION: &[u8] = &[0x9F, 0x29];
pub const KERNEL_IDENTIFIER: &[u8] = &[0x9F, 0x2A];
pub const TERMINAL_CAPABILITIES: &[u8] = &[0x9F, 0x33];
pub const TERMINAL_TYPE: &[u8] = &[0x9F, 0x35];
pub const UNPREDICTABLE_NUMBER: &[u8] = &[0x9F, 0x37];
pub const PDOL: &[u8] = &[0x9F, 0x38];
pub const POS_ENTRY_MODE: &[u8] = &[0x9F, 0x39];
pub const ADDITIONAL_TERMINAL_CAPABILITIES: &[u8] = &[0x9F, 0x40];
pub const MERCHANT_NAME_AND_LOCATION: &[u8] = &[0x9F, 0x4E];
pub const TTQ: &[u8] = &[0x9F, 0x66];
pub const FCI_PROPRIETARY_TEMPLATE: &[u8] = &[0xA5];
pub const FCI_ISSUER_DISCRETIONARY_DATA: &[u8] = &[0xBF, 0x0C];

/// Proprietary tags of the terminal configuration blob (private class,
/// `..E371` suffix).
pub mod cfg {
    pub const CONFIGURATION: &[u8] = &[0xFF, 0x81, 0xE3, 0x71];
    pub const COMBINATION_SET: &[u8] = &[0xFF, 0x82, 0xE3, 0x71];
    pub const TRANSACTION_TYPES: &[u8] = &[0xDF, 0x83, 0xE3, 0x71];
    pub const COMBINATION: &[u8] = &[0xFF, 0x84, 0xE3, 0x71];
    pub const AID: &[u8] = &[0xDF, 0x85, 0xE3, 0x71];
    pub const KERNEL_ID: &[u8] = &[0xDF, 0x86, 0xE3, 0x71];
    pub const STATUS_CHECK_SUPPORTED: &[u8] = &[0xDF, 0x87, 0xE3, 0x71];
    pub const ZERO_AMOUNT_ALLOWED: &[u8] = &[0xDF, 0x88, 0xE3, 0x71];
    pub const EXT_SELECTION_SUPPORTED: &[u8] = &[0xDF, 0x89, 0xE3, 0x71];
    pub const READER_CTLS_TXN_LIMIT: &[u8] = &[0xDF, 0x8A, 0xE3, 0x71];
    pub const READER_CTLS_FLOOR_LIMIT: &[u8] = &[0xDF, 0x8B, 0xE3, 0x71];
    pub const TERMINAL_FLOOR_LIMIT: &[u8] = &[0xDF, 0x8C, 0xE3, 0x71];
    pub const READER_CVM_REQUIRED_LIMIT: &[u8] = &[0xDF, 0x8D, 0xE3, 0x71];
    pub const TTQ: &[u8] = &[0xDF, 0x8E, 0xE3, 0x71];
    pub const AUTORUN: &[u8] = &[0xFF, 0x8F, 0xE3, 0x71];
    pub const AUTORUN_TRANSACTION_TYPE: &[u8] = &[0xDF, 0x90, 0xE3, 0x71];
    pub const AUTORUN_AMOUNT_AUTHORIZED: &[u8] = &[0xDF, 0x91, 0xE3, 0x71];
    pub const TERMINAL_DATA: &[u8] = &[0xFF, 0x92, 0xE3, 0x71];
}
