// SLCAN (Lawicel ASCII) serial CAN adapter
//
// Frame format: [T|t][id hex][dlc][data hex...]\r
// T = extended (8 hex id digits), t = standard (3 hex id digits).
// The adapter answers commands with \r (ok) or \x07 (error).

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

use crate::vesc::CanFrame;

const READ_TIMEOUT_MS: u64 = 100;

const CR: u8 = b'\r';
const BELL: u8 = 0x07;

// Longest extended frame line: T + 8 id + 1 dlc + 16 data, plus one spare
const MAX_LINE_LEN: usize = 27;

#[derive(Debug, thiserror::Error)]
pub enum SlcanError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bitrate {0} is not supported by SLCAN")]
    UnsupportedBitrate(u32),

    #[error("Invalid SLCAN frame '{line}': {reason}")]
    InvalidFrame { line: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, SlcanError>;

/// Setup command selecting a standard bitrate
pub fn bitrate_command(bitrate: u32) -> Result<&'static str> {
    Ok(match bitrate {
        10_000 => "S0\r",
        20_000 => "S1\r",
        50_000 => "S2\r",
        100_000 => "S3\r",
        125_000 => "S4\r",
        250_000 => "S5\r",
        500_000 => "S6\r",
        800_000 => "S7\r",
        1_000_000 => "S8\r",
        other => return Err(SlcanError::UnsupportedBitrate(other)),
    })
}

/// Encode an extended data frame
pub fn encode_frame(frame: &CanFrame) -> String {
    let mut line = format!("T{:08X}{}", frame.id & 0x1FFF_FFFF, frame.payload().len());
    for byte in frame.payload() {
        line.push_str(&format!("{:02X}", byte));
    }
    line.push('\r');
    line
}

/// Parse one line (without its terminator).
///
/// Returns `Ok(None)` for lines that are not extended data frames: standard
/// frames, remote frames and command acknowledgements.
pub fn parse_line(line: &[u8]) -> Result<Option<CanFrame>> {
    let invalid = |reason| SlcanError::InvalidFrame {
        line: String::from_utf8_lossy(line).into_owned(),
        reason,
    };

    match line.first() {
        Some(b'T') => {}
        Some(b't' | b'r' | b'R' | b'z' | b'Z') | None => return Ok(None),
        Some(_) => return Err(invalid("unknown message type")),
    }

    if line.len() < 10 {
        return Err(invalid("truncated header"));
    }
    let id = hex_u32(&line[1..9]).ok_or_else(|| invalid("bad identifier"))?;
    let dlc = match line[9] {
        d @ b'0'..=b'8' => d - b'0',
        _ => return Err(invalid("bad data length")),
    };

    let hex = &line[10..];
    if hex.len() < usize::from(dlc) * 2 {
        return Err(invalid("data shorter than length code"));
    }
    let mut data = [0u8; 8];
    for (i, pair) in hex.chunks(2).take(usize::from(dlc)).enumerate() {
        data[i] = hex_u32(pair).ok_or_else(|| invalid("bad data byte"))? as u8;
    }

    Ok(Some(CanFrame { id, dlc, data }))
}

fn hex_u32(digits: &[u8]) -> Option<u32> {
    // from_str_radix alone would accept a leading '+'
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = std::str::from_utf8(digits).ok()?;
    u32::from_str_radix(text, 16).ok()
}

/// Feed one received byte into the line buffer.
///
/// Returns a frame once a complete extended data frame line has arrived.
/// Lines longer than any valid frame are discarded.
fn accept_byte(line: &mut Vec<u8>, byte: u8) -> Option<CanFrame> {
    match byte {
        CR => {
            let parsed = parse_line(line);
            line.clear();
            match parsed {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            }
        }
        BELL => {
            warn!("SLCAN adapter reported an error");
            line.clear();
            None
        }
        b => {
            if line.len() >= MAX_LINE_LEN {
                warn!("Dropping unterminated SLCAN line of {} bytes", line.len());
                line.clear();
            }
            line.push(b);
            None
        }
    }
}

/// SLCAN adapter on a serial port
pub struct SlcanBus {
    port: Box<dyn SerialPort>,
    line: Vec<u8>,
}

impl SlcanBus {
    /// Open the port, set the bus bitrate and open the CAN channel
    pub fn open(port_name: &str, baudrate: u32, bitrate: u32) -> Result<Self> {
        let setup = bitrate_command(bitrate)?;
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .open()?;

        let mut bus = Self {
            port,
            line: Vec::with_capacity(MAX_LINE_LEN),
        };
        // Close first in case the channel was left open
        bus.write_raw(b"C\r")?;
        bus.write_raw(setup.as_bytes())?;
        bus.write_raw(b"O\r")?;
        debug!("SLCAN channel opened on {} at {} bit/s", port_name, bitrate);
        Ok(bus)
    }

    /// Second handle to the same port, used for the reader and writer threads
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            port: self.port.try_clone()?,
            line: Vec::with_capacity(MAX_LINE_LEN),
        })
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    pub fn send(&mut self, frame: &CanFrame) -> Result<()> {
        self.write_raw(encode_frame(frame).as_bytes())
    }

    /// Read until one extended frame is complete.
    ///
    /// Returns `Ok(None)` when the read times out first.
    pub fn read_frame(&mut self) -> Result<Option<CanFrame>> {
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(SlcanError::Io(e)),
            }

            if let Some(frame) = accept_byte(&mut self.line, byte[0]) {
                return Ok(Some(frame));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vesc::codec::{self, CommandKind};

    #[test]
    fn test_encode_command_frame() {
        let frame = codec::encode_command(8, CommandKind::Velocity, 1000);
        assert_eq!(encode_frame(&frame), "T000003084000003E8\r");
    }

    #[test]
    fn test_parse_status_frame() {
        let frame = parse_line(b"T00001B0840000002A").unwrap().unwrap();
        assert_eq!(frame.id, 0x1B08);
        assert_eq!(frame.payload(), &[0x00, 0x00, 0x00, 0x2A]);
    }

    #[test]
    fn test_parse_ignores_standard_and_acks() {
        assert_eq!(parse_line(b"t12320102").unwrap(), None);
        assert_eq!(parse_line(b"z").unwrap(), None);
        assert_eq!(parse_line(b"").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_line(b"T0000").is_err());
        assert!(parse_line(b"T00000908900").is_err());
        assert!(parse_line(b"T000009088001122").is_err());
        assert!(parse_line(b"T0000090820GG").is_err());
        assert!(parse_line(b"X").is_err());
    }

    #[test]
    fn test_parse_rejects_sign_characters() {
        assert!(parse_line(b"T+0001B084+0+0+0+2").is_err());
        assert!(parse_line(b"T00001B084+0000002").is_err());
    }

    #[test]
    fn test_line_buffer_bounded() {
        let mut line = Vec::new();
        for _ in 0..100 {
            assert_eq!(accept_byte(&mut line, b'F'), None);
            assert!(line.len() <= MAX_LINE_LEN);
        }
    }

    #[test]
    fn test_overlong_line_dropped_then_recovers() {
        let mut line = Vec::new();
        let mut stream = vec![b'T'; 40];
        stream.extend_from_slice(b"\rT00001B0840000002A\r");

        let frames: Vec<_> = stream.iter().filter_map(|&b| accept_byte(&mut line, b)).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[0x00, 0x00, 0x00, 0x2A]);
    }

    #[test]
    fn test_bitrate_commands() {
        assert_eq!(bitrate_command(500_000).unwrap(), "S6\r");
        assert_eq!(bitrate_command(1_000_000).unwrap(), "S8\r");
        assert!(bitrate_command(42).is_err());
    }
}
