//! gatekeep-hw: hardware access for the RFID channel.
//!
//! Provides a line-oriented tty reader with termios setup and an embedded
//! database of reader profiles keyed by USB VID:PID.

pub mod readers;
pub mod rfid;

pub use readers::{list_profiles, profile_for_device, ReaderProfile, SerialSettings};
pub use rfid::{RfidError, RfidReader};
