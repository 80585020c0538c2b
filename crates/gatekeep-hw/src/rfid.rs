//! Line-oriented RFID reader on a serial tty.
//!
//! The reader is configured raw (no echo, no line discipline) at the
//! profile's baud rate. Paths that are not ttys (FIFOs, plain files used for
//! bench testing) are read as-is.

use crate::readers::SerialSettings;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::io::AsRawFd;
use thiserror::Error;

/// Longest frame kept; anything longer is line noise.
const MAX_LINE_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum RfidError {
    #[error("failed to open reader {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaud(u32),
    #[error("termios setup failed: {0}")]
    Termios(std::io::Error),
    #[error("read failed: {0}")]
    Read(std::io::Error),
}

/// An open RFID reader.
pub struct RfidReader {
    path: String,
    reader: BufReader<File>,
    terminator: u8,
    buf: Vec<u8>,
}

impl RfidReader {
    /// Open the reader at `path` and apply `settings` if it is a tty.
    pub fn open(path: &str, settings: SerialSettings) -> Result<Self, RfidError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|source| RfidError::Open {
                path: path.to_string(),
                source,
            })?;

        if is_tty(&file) {
            configure_raw(&file, settings.baud)?;
            tracing::info!(device = path, baud = settings.baud, "RFID reader configured");
        } else {
            tracing::info!(device = path, "RFID source is not a tty; reading as-is");
        }

        Ok(Self {
            path: path.to_string(),
            reader: BufReader::new(file),
            terminator: settings.terminator,
            buf: Vec::with_capacity(64),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Block until the next non-empty line. `Ok(None)` means the reader went
    /// away (EOF, e.g. USB disconnect).
    pub fn read_line(&mut self) -> Result<Option<String>, RfidError> {
        loop {
            if !self.fill_frame()? {
                return Ok(None);
            }
            if self.buf.len() > MAX_LINE_LEN && self.buf.last() != Some(&self.terminator) {
                tracing::debug!(max = MAX_LINE_LEN, "oversized RFID frame; skipping to terminator");
                if !self.skip_frame()? {
                    return Ok(None);
                }
                continue;
            }
            if let Some(line) = clean_frame(&self.buf) {
                return Ok(Some(line));
            }
        }
    }

    /// Read at most `MAX_LINE_LEN + 1` bytes up to the terminator into `buf`.
    /// Returns `false` on EOF.
    fn fill_frame(&mut self) -> Result<bool, RfidError> {
        self.buf.clear();
        let n = (&mut self.reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(self.terminator, &mut self.buf)
            .map_err(RfidError::Read)?;
        Ok(n > 0)
    }

    /// Drop bytes through the next terminator. Returns `false` on EOF.
    fn skip_frame(&mut self) -> Result<bool, RfidError> {
        loop {
            if !self.fill_frame()? {
                return Ok(false);
            }
            if self.buf.last() == Some(&self.terminator) {
                return Ok(true);
            }
        }
    }
}

/// Strip framing bytes (STX/ETX, CR/LF) and reject empty or oversized frames.
fn clean_frame(raw: &[u8]) -> Option<String> {
    if raw.len() > MAX_LINE_LEN {
        tracing::debug!(len = raw.len(), "discarding oversized RFID frame");
        return None;
    }
    let text = String::from_utf8_lossy(raw);
    let line: String = text.chars().filter(|c| !c.is_control()).collect();
    let line = line.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

fn is_tty(file: &File) -> bool {
    // SAFETY: fd is valid for the lifetime of `file`.
    unsafe { libc::isatty(file.as_raw_fd()) == 1 }
}

fn baud_constant(baud: u32) -> Result<libc::speed_t, RfidError> {
    Ok(match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        other => return Err(RfidError::UnsupportedBaud(other)),
    })
}

fn configure_raw(file: &File, baud: u32) -> Result<(), RfidError> {
    let speed = baud_constant(baud)?;
    let fd = file.as_raw_fd();

    // SAFETY: termios is plain old data; tcgetattr fully initializes it on success.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: fd is valid, `tio` is a valid out-pointer.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(RfidError::Termios(std::io::Error::last_os_error()));
    }

    // SAFETY: `tio` was initialized by tcgetattr above.
    unsafe {
        libc::cfmakeraw(&mut tio);
        libc::cfsetispeed(&mut tio, speed);
        libc::cfsetospeed(&mut tio, speed);
    }
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    // SAFETY: fd is valid and `tio` is fully initialized.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(RfidError::Termios(std::io::Error::last_os_error()));
    }
    Ok(())
}
