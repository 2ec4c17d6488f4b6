//! Outcomes and user interface requests.
//!
//! The vocabulary here is the one of EMV Contactless Book A: an entry point
//! or kernel never reports errors to the cardholder directly, it produces an
//! Outcome with optional UI requests attached, and the surrounding POS
//! system decides what to do with it.

use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const MAX_DATA_RECORD_LEN: usize = 512;
pub const MAX_DISCRETIONARY_DATA_LEN: usize = 1024;

/// Message identifiers from Book A, Table 4-3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageIdentifier {
    Approved = 0x03,
    NotAuthorized = 0x07,
    EnterPin = 0x09,
    ProcessingError = 0x0F,
    RemoveCard = 0x10,
    Welcome = 0x14,
    PresentCard = 0x15,
    Processing = 0x16,
    CardReadOk = 0x17,
    InsertOrSwipeCard = 0x18,
    PresentOneCardOnly = 0x19,
    ApprovedPleaseSign = 0x1A,
    Authorising = 0x1B,
    TryAnotherCard = 0x1C,
    InsertCard = 0x1D,
    ClearDisplay = 0x1E,
    SeePhone = 0x20,
    PresentCardAgain = 0x21,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum UiStatus {
    #[default]
    NotReady = 0,
    Idle,
    ReadyToRead,
    Processing,
    CardReadSuccessfully,
    ProcessingError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueQualifier {
    #[default]
    Amount,
    Balance,
}

/// One request towards whatever renders the cardholder display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiRequest {
    pub msg: MessageIdentifier,
    pub status: UiStatus,
    /// How long to hold the message, in units of 100 ms; zero means "until
    /// the next request".
    pub hold_time: u8,
    /// ISO 639 language codes, two bytes each, most preferred first.
    pub lang_pref: Vec<u8>,
    pub value_qualifier: ValueQualifier,
    /// 6-byte BCD amount or balance, per the qualifier.
    pub value: [u8; 6],
    /// ISO 4217 numeric currency code.
    pub currency_code: [u8; 2],
}

impl UiRequest {
    pub fn new(msg: MessageIdentifier, status: UiStatus) -> Self {
        Self {
            msg,
            status,
            hold_time: 0,
            lang_pref: Vec::new(),
            value_qualifier: ValueQualifier::default(),
            value: [0; 6],
            currency_code: [0; 2],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutcomeKind {
    #[default]
    NotApplicable,
    SelectNext,
    TryAgain,
    Approved,
    Declined,
    OnlineRequest,
    TryAnotherInterface,
    EndApplication,
}

/// Entry point re-activation targets a restart outcome may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Start {
    A,
    B,
    C,
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineResponseType {
    EmvData,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cvm {
    OnlinePin,
    ConfirmationCodeVerified,
    ObtainSignature,
    NoCvm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlternateInterfacePref {
    ContactChip,
    Magstripe,
}

/// The final word on a transaction attempt, shaped after Book A, Table 6-1.
///
/// A `start` of `Some(..)` is meaningful only to the caller: the entry point
/// never re-enters itself, the enclosing driver decides whether to activate
/// again from that start point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub start: Option<Start>,
    pub online_response: Option<OnlineResponseType>,
    pub cvm: Option<Cvm>,
    pub ui_request: Option<UiRequest>,
    pub ui_request_on_restart: Option<UiRequest>,
    pub data_record: Vec<u8>,
    pub discretionary_data: Vec<u8>,
    pub receipt: bool,
    pub alternate_interface: Option<AlternateInterfacePref>,
    /// Hold time for a requested field off, in units of 100 ms.
    pub field_off_hold_time: Option<u32>,
    pub removal_timeout: u32,
}

impl Outcome {
    /// "Try Another Interface" with the insert-or-swipe prompt attached.
    pub fn try_another_interface() -> Self {
        Self {
            kind: OutcomeKind::TryAnotherInterface,
            ui_request: Some(UiRequest::new(
                MessageIdentifier::InsertOrSwipeCard,
                UiStatus::ProcessingError,
            )),
            ..Self::default()
        }
    }

    /// "End Application" with the try-another-card prompt attached.
    pub fn end_application() -> Self {
        Self {
            kind: OutcomeKind::EndApplication,
            ui_request: Some(UiRequest::new(
                MessageIdentifier::TryAnotherCard,
                UiStatus::ReadyToRead,
            )),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_identifier_bytes() {
        assert_eq!(u8::from(MessageIdentifier::PresentCard), 0x15);
        assert_eq!(u8::from(MessageIdentifier::InsertOrSwipeCard), 0x18);
        assert_eq!(
            MessageIdentifier::try_from(0x1C).unwrap(),
            MessageIdentifier::TryAnotherCard
        );
        assert!(MessageIdentifier::try_from(0x00).is_err());
    }

    #[test]
    fn test_blocked_interface_outcome_shape() {
        let outcome = Outcome::try_another_interface();
        assert_eq!(outcome.kind, OutcomeKind::TryAnotherInterface);
        assert_eq!(outcome.start, None);
        let ui = outcome.ui_request.unwrap();
        assert_eq!(ui.msg, MessageIdentifier::InsertOrSwipeCard);
        assert_eq!(ui.status, UiStatus::ProcessingError);
        assert!(outcome.ui_request_on_restart.is_none());
        assert_eq!(outcome.removal_timeout, 0);
    }
}
