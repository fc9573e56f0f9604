//! The TCP bootstrap handshake frame (spec.md §6 "RDMA handshake frame";
//! §4.7 "Initial handshake"): a fixed 256-byte text frame describing both
//! QPs' block sizes and connection triples, exchanged once per transport
//! before any verbs traffic flows.
//!
//! Mirrors `ib_verbs_handshake`'s `sprintf`/`sscanf` pair exactly, including
//! its field order and the "10 conversions or reject" check (spec.md
//! "Boundary behaviors": "Handshake frame with 9 parseable fields (one
//! malformed) must be rejected").

use std::io::{Read, Write};
use std::net::TcpStream;

use thiserror::Error;

pub const FRAME_SIZE: usize = 256;

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("io error during handshake: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake frame does not start with 'QP1:'; remote transport type differs")]
    WrongTransport,

    #[error("{0} of 10 fields parsed in handshake frame, rejecting")]
    Incomplete(usize),
}

/// The ten fields exchanged over the bootstrap socket, in wire order (spec.md
/// §6). `recv_blksize`/`send_blksize` are this side's *advertised* sizes;
/// callers take the min of their own configured size and the peer's
/// advertised one per direction (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeFrame {
    pub qp0_recv_blksize: u32,
    pub qp0_send_blksize: u32,
    pub qp1_recv_blksize: u32,
    pub qp1_send_blksize: u32,
    pub qp0_lid: u16,
    pub qp0_qpn: u32,
    pub qp0_psn: u32,
    pub qp1_lid: u16,
    pub qp1_qpn: u32,
    pub qp1_psn: u32,
}

impl HandshakeFrame {
    /// Render the exact text format from spec.md §6, zero-padded to 256
    /// bytes.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let text = format!(
            "QP1:RECV_BLKSIZE={:08x}:SEND_BLKSIZE={:08x}\n\
             QP2:RECV_BLKSIZE={:08x}:SEND_BLKSIZE={:08x}\n\
             QP1:LID={:04x}:QPN={:06x}:PSN={:06x}\n\
             QP2:LID={:04x}:QPN={:06x}:PSN={:06x}\n",
            self.qp0_recv_blksize,
            self.qp0_send_blksize,
            self.qp1_recv_blksize,
            self.qp1_send_blksize,
            self.qp0_lid,
            self.qp0_qpn,
            self.qp0_psn,
            self.qp1_lid,
            self.qp1_qpn,
            self.qp1_psn,
        );
        let mut buf = [0u8; FRAME_SIZE];
        let bytes = text.as_bytes();
        let n = bytes.len().min(FRAME_SIZE);
        buf[..n].copy_from_slice(&bytes[..n]);
        buf
    }

    /// Parse a received 256-byte frame. Ten hex fields must all parse or the
    /// peer rejects the handshake (spec.md §6).
    pub fn decode(buf: &[u8; FRAME_SIZE]) -> Result<Self, HandshakeError> {
        let text = String::from_utf8_lossy(buf);
        if !text.starts_with("QP1:") {
            return Err(HandshakeError::WrongTransport);
        }

        let fields = extract_hex_fields(&text);
        if fields.len() != 10 {
            return Err(HandshakeError::Incomplete(fields.len()));
        }

        Ok(HandshakeFrame {
            qp0_recv_blksize: fields[0],
            qp0_send_blksize: fields[1],
            qp1_recv_blksize: fields[2],
            qp1_send_blksize: fields[3],
            qp0_lid: fields[4] as u16,
            qp0_qpn: fields[5],
            qp0_psn: fields[6],
            qp1_lid: fields[7] as u16,
            qp1_qpn: fields[8],
            qp1_psn: fields[9],
        })
    }
}

/// Pulls every `KEY=hexvalue` field out of the frame text, in appearance
/// order, tolerating the 9-of-10 malformed-field boundary case by simply
/// producing fewer than 10 entries (spec.md "Boundary behaviors").
fn extract_hex_fields(text: &str) -> Vec<u32> {
    let mut out = Vec::with_capacity(10);
    for segment in text.split([':', '\n']) {
        if let Some(eq) = segment.find('=') {
            let value = &segment[eq + 1..];
            if !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit()) {
                if let Ok(parsed) = u32::from_str_radix(value, 16) {
                    out.push(parsed);
                }
            }
        }
    }
    out
}

/// Send this side's frame and block for the peer's (spec.md §5 "Suspension
/// points": "TCP `recv` during RDMA handshake blocks until the full 256-byte
/// frame arrives").
pub fn exchange(sock: &mut TcpStream, local: &HandshakeFrame) -> Result<HandshakeFrame, HandshakeError> {
    sock.write_all(&local.encode())?;
    let mut buf = [0u8; FRAME_SIZE];
    sock.read_exact(&mut buf)?;
    HandshakeFrame::decode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HandshakeFrame {
        HandshakeFrame {
            qp0_recv_blksize: 131072,
            qp0_send_blksize: 131072,
            qp1_recv_blksize: 1048576,
            qp1_send_blksize: 1048576,
            qp0_lid: 0x0003,
            qp0_qpn: 0x001234,
            qp0_psn: 0x005678,
            qp1_lid: 0x0004,
            qp1_qpn: 0x004321,
            qp1_psn: 0x008765,
        }
    }

    #[test]
    fn encode_is_exactly_256_bytes() {
        assert_eq!(sample().encode().len(), FRAME_SIZE);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let frame = sample();
        let decoded = HandshakeFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn frame_not_starting_with_qp1_is_rejected() {
        let mut buf = [0u8; FRAME_SIZE];
        buf[..4].copy_from_slice(b"XXX:");
        assert!(matches!(HandshakeFrame::decode(&buf), Err(HandshakeError::WrongTransport)));
    }

    #[test]
    fn nine_of_ten_fields_is_rejected() {
        // Drop the last field (qp1_psn) to land at 9 conversions.
        let text = "QP1:RECV_BLKSIZE=00020000:SEND_BLKSIZE=00020000\n\
                     QP2:RECV_BLKSIZE=00100000:SEND_BLKSIZE=00100000\n\
                     QP1:LID=0003:QPN=001234:PSN=005678\n\
                     QP2:LID=0004:QPN=004321:PSN=\n";
        let mut buf = [0u8; FRAME_SIZE];
        let bytes = text.as_bytes();
        buf[..bytes.len().min(FRAME_SIZE)].copy_from_slice(&bytes[..bytes.len().min(FRAME_SIZE)]);
        assert!(matches!(HandshakeFrame::decode(&buf), Err(HandshakeError::Incomplete(9))));
    }
}
