//! Short-form APDU construction and response splitting.

use std::fmt;

use tracing::trace;

use crate::hal::Hal;
use crate::{Error, Result};

pub const SELECT_CLA: u8 = 0x00;
pub const SELECT_INS: u8 = 0xA4;
pub const SELECT_P1_BY_NAME: u8 = 0x04;
pub const SELECT_P2_FIRST: u8 = 0x00;
/// Reserved for SELECT-next iteration; unused by the entry point itself.
pub const SELECT_P2_NEXT: u8 = 0x02;

// GET PROCESSING OPTIONS is sent by kernels, not by the entry point; the
// header constants live here so they only get defined once.
pub const GPO_CLA: u8 = 0x80;
pub const GPO_INS: u8 = 0xA8;
pub const P1_NONE: u8 = 0x00;
pub const P2_NONE: u8 = 0x00;

/// A raw command APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cla: u8,       // Class byte.
    pub ins: u8,       // Instruction byte.
    pub p1: u8,        // First parameter.
    pub p2: u8,        // Second parameter.
    pub data: Vec<u8>, // Command data.

    /// Expected (maximum) length of the response; set with `expect()`.
    /// 256 encodes as Le = 0x00.
    pub le: Option<usize>,
}

impl Command {
    pub fn new<T: Into<Vec<u8>>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: data.into(),
            le: None,
        }
    }

    pub fn expect(mut self, le: usize) -> Self {
        self.le = Some(le);
        self
    }

    /// Serializes as `CLA INS P1 P2 [Lc data] [Le]`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bin = vec![self.cla, self.ins, self.p1, self.p2];

        match self.data.len() {
            0 => (),
            x @ 1..=255 => bin.push(x as u8),
            256 => bin.push(0x00),
            _ => return Err(Error::Overflow),
        }
        bin.extend_from_slice(&self.data);

        match self.le {
            None => (),
            Some(le @ 1..=255) => bin.push(le as u8),
            Some(256) => bin.push(0x00),
            Some(_) => return Err(Error::Overflow),
        }

        Ok(bin)
    }
}

/// A 2-byte APDU status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u8, pub u8);

impl Status {
    pub const OK: Status = Status(0x90, 0x00);
    pub const WRONG_LENGTH: Status = Status(0x67, 0x00);
    pub const FILE_NOT_FOUND: Status = Status(0x6A, 0x82);
    pub const INS_NOT_SUPPORTED: Status = Status(0x6D, 0x00);
    pub const CLA_NOT_SUPPORTED: Status = Status(0x6E, 0x00);

    pub fn is_ok(&self) -> bool {
        *self == Status::OK
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        [self.0, self.1]
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.0, self.1)
    }
}

/// Sends a command and splits the R-APDU into body and status word.
pub fn transceive(hal: &mut dyn Hal, cmd: &Command) -> Result<(Vec<u8>, Status)> {
    let capdu = cmd.encode()?;
    trace!(capdu = %hex::encode_upper(&capdu), ">> TX");

    let rapdu = hal.transceive(&capdu)?;
    trace!(rapdu = %hex::encode_upper(&rapdu), "<< RX");

    if rapdu.len() < 2 {
        return Err(Error::CardProtocol("R-APDU shorter than its status word"));
    }
    let (body, sw) = rapdu.split_at(rapdu.len() - 2);
    Ok((body.to_vec(), Status(sw[0], sw[1])))
}

/// SELECT by DF name, first occurrence.
pub fn select_by_name(hal: &mut dyn Hal, name: &[u8]) -> Result<(Vec<u8>, Status)> {
    transceive(
        hal,
        &Command::new(SELECT_CLA, SELECT_INS, SELECT_P1_BY_NAME, SELECT_P2_FIRST, name)
            .expect(256),
    )
}
