//! Reader profile database.
//!
//! Maps the USB VID:PID of a reader's serial bridge to the line settings its
//! firmware uses. Profile files are embedded at compile time from
//! `contrib/readers/*.toml`.

use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

const PROFILE_1A86_7523: &str = include_str!("../../../contrib/readers/1a86-7523.toml");
const PROFILE_10C4_EA60: &str = include_str!("../../../contrib/readers/10c4-ea60.toml");

/// Baud rate used when neither a profile nor an override applies.
pub const DEFAULT_BAUD: u32 = 9600;

static PROFILE_DB: OnceLock<Vec<ReaderProfile>> = OnceLock::new();

/// One `contrib/readers/*.toml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderProfile {
    pub device: DeviceInfo,
    pub serial: SerialSettings,
}

/// Bridge identification from the `[device]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
}

/// Line settings from the `[serial]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SerialSettings {
    pub baud: u32,
    /// Byte that ends one read.
    #[serde(default = "default_terminator")]
    pub terminator: u8,
}

fn default_terminator() -> u8 {
    b'\n'
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            terminator: default_terminator(),
        }
    }
}

fn profile_db() -> &'static Vec<ReaderProfile> {
    PROFILE_DB.get_or_init(|| {
        let mut db = Vec::new();
        for src in [PROFILE_1A86_7523, PROFILE_10C4_EA60] {
            match toml::from_str::<ReaderProfile>(src) {
                Ok(p) => db.push(p),
                Err(e) => tracing::error!(error = %e, "bad reader profile TOML"),
            }
        }
        db
    })
}

/// Look up a profile by USB vendor:product ID.
pub fn lookup_profile(vid: u16, pid: u16) -> Option<&'static ReaderProfile> {
    profile_db()
        .iter()
        .find(|p| p.device.vendor_id == vid && p.device.product_id == pid)
}

/// All embedded profiles.
pub fn list_profiles() -> &'static [ReaderProfile] {
    profile_db()
}

/// Resolve the profile for a `/dev/ttyUSBn` or `/dev/ttyACMn` path via sysfs.
pub fn profile_for_device(device_path: &str) -> Option<&'static ReaderProfile> {
    let (vid, pid) = get_usb_ids(device_path)?;
    let profile = lookup_profile(vid, pid);
    if profile.is_none() {
        tracing::debug!(device = device_path, vid, pid, "no reader profile for USB bridge");
    }
    profile
}

/// Read USB VID:PID for a tty device from sysfs.
///
/// `/sys/class/tty/<name>/device` points at the usb-serial port (ttyUSB) or
/// the USB interface (ttyACM); the USB device directory holding `idVendor`
/// is one or two levels above.
pub fn get_usb_ids(device_path: &str) -> Option<(u16, u16)> {
    let dev_name = Path::new(device_path).file_name()?.to_str()?;
    let device_link = format!("/sys/class/tty/{dev_name}/device");
    let resolved = std::fs::canonicalize(device_link).ok()?;

    let usb_device_dir = resolved
        .ancestors()
        .take(4)
        .find(|dir| dir.join("idVendor").is_file())?;

    let vid_str = std::fs::read_to_string(usb_device_dir.join("idVendor")).ok()?;
    let pid_str = std::fs::read_to_string(usb_device_dir.join("idProduct")).ok()?;

    let vid = u16::from_str_radix(vid_str.trim(), 16).ok()?;
    let pid = u16::from_str_radix(pid_str.trim(), 16).ok()?;
    Some((vid, pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_profiles_parse() {
        assert_eq!(list_profiles().len(), 2);
    }

    #[test]
    fn test_lookup_known_bridge() {
        let profile = lookup_profile(0x1a86, 0x7523).unwrap();
        assert_eq!(profile.serial.baud, 9600);
        assert_eq!(profile.serial.terminator, b'\n');

        let nfc = lookup_profile(0x10c4, 0xea60).unwrap();
        assert_eq!(nfc.serial.terminator, b'\r');
    }

    #[test]
    fn test_lookup_unknown_bridge() {
        assert!(lookup_profile(0xdead, 0xbeef).is_none());
    }

    #[test]
    fn test_terminator_defaults_to_newline() {
        let profile: ReaderProfile = toml::from_str(
            "[device]\nvendor_id = 1\nproduct_id = 2\nname = \"x\"\n[serial]\nbaud = 19200\n",
        )
        .unwrap();
        assert_eq!(profile.serial, SerialSettings { baud: 19200, terminator: b'\n' });
    }

    #[test]
    fn test_non_tty_path_has_no_usb_ids() {
        assert!(get_usb_ids("/definitely/not/a/tty").is_none());
    }
}
