//! Capability contract towards the contactless RF frontend.
//!
//! The entry point drives the frontend through this trait only; polling,
//! anticollision and the wire protocol below APDUs are Book D territory and
//! stay on the other side of it. All calls block until the RF layer has an
//! answer, except [`Hal::ui_request`], which is fire-and-forget.

use crate::outcome::UiRequest;
use crate::Result;

/// What the field looks like after a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// Exactly one card is in the field and ready to talk.
    CardDetected,
    /// More than one card presented (collision as defined in Book D).
    Collision,
    /// A reported collision has cleared; keep waiting.
    Continue,
}

pub trait Hal {
    /// Powers the field up and starts polling.
    fn start_polling(&mut self) -> Result<()>;

    /// Blocks until a card shows up or the collision state changes.
    fn wait_for_card(&mut self) -> Result<PollEvent>;

    /// Sends a C-APDU and blocks for the raw R-APDU, status word included.
    fn transceive(&mut self, capdu: &[u8]) -> Result<Vec<u8>>;

    /// Hands a message to whatever renders the cardholder UI.
    fn ui_request(&mut self, request: &UiRequest);
}
