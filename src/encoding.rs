//! Byte-stuffed frame encoding for the half-duplex bus.
//!
//! A frame on the wire is `START payload-with-escapes END`. Any payload byte
//! equal to [`FRAME_START`], [`FRAME_END`] or [`FRAME_ESCAPE`] is replaced by
//! `FRAME_ESCAPE, byte ^ FRAME_ESCAPE`, so the delimiters never appear inside
//! a frame and a receiver can resynchronise on the next `START`.
//!
//! ## Functions
//!
//! - [`encode_byte`]: Escapes a single payload byte
//! - [`unescape`]: Recovers the payload byte that followed an escape delimiter
//! - [`FrameEncoder`]: Lazily yields every wire byte of a frame
//! - [`encode_frame`]: Encodes a full payload into an output slice
//!
//! Decoding is not a batch function: bytes arrive one at a time from the bus,
//! so the inverse lives in the receive state machine, [`crate::rx::RxAssembler`].

use crate::consts::{FRAME_END, FRAME_ESCAPE, FRAME_START};

/// Returns `true` for the three values that must be escaped inside a frame.
pub const fn is_reserved(byte: u8) -> bool {
    matches!(byte, FRAME_START | FRAME_END | FRAME_ESCAPE)
}

/// Recovers an escaped payload byte.
pub const fn unescape(byte: u8) -> u8 {
    byte ^ FRAME_ESCAPE
}

/// Encodes a single payload byte.
///
/// # Returns
/// The wire bytes and how many of them are used (1 or 2).
pub const fn encode_byte(byte: u8) -> ([u8; 2], usize) {
    if is_reserved(byte) {
        ([FRAME_ESCAPE, byte ^ FRAME_ESCAPE], 2)
    } else {
        ([byte, 0], 1)
    }
}

/// Number of wire bytes `payload` occupies once framed.
pub fn encoded_len(payload: &[u8]) -> usize {
    2 + payload
        .iter()
        .map(|&b| if is_reserved(b) { 2 } else { 1 })
        .sum::<usize>()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderStage {
    Start,
    Body,
    Escaped(u8),
    End,
    Done,
}

/// Iterator over the wire bytes of one frame.
///
/// Used by the transmit path to stream a frame into the serial port without
/// materialising the escaped copy.
#[derive(Debug, Clone)]
pub struct FrameEncoder<'a> {
    payload: core::slice::Iter<'a, u8>,
    stage: EncoderStage,
}

impl<'a> FrameEncoder<'a> {
    /// Starts encoding `payload`.
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            payload: payload.iter(),
            stage: EncoderStage::Start,
        }
    }
}

impl Iterator for FrameEncoder<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        match self.stage {
            EncoderStage::Start => {
                self.stage = EncoderStage::Body;
                Some(FRAME_START)
            }
            EncoderStage::Escaped(b) => {
                self.stage = EncoderStage::Body;
                Some(b)
            }
            EncoderStage::Body => match self.payload.next() {
                Some(&b) => {
                    let ([first, second], n) = encode_byte(b);
                    if n == 2 {
                        self.stage = EncoderStage::Escaped(second);
                    }
                    Some(first)
                }
                None => {
                    self.stage = EncoderStage::End;
                    self.next()
                }
            },
            EncoderStage::End => {
                self.stage = EncoderStage::Done;
                Some(FRAME_END)
            }
            EncoderStage::Done => None,
        }
    }
}

/// Encodes `input` as a complete frame into `output`.
///
/// # Returns
/// The number of bytes written, or `None` if `output` is too small.
pub fn encode_frame(input: &[u8], output: &mut [u8]) -> Option<usize> {
    let needed = encoded_len(input);
    if output.len() < needed {
        return None;
    }
    for (slot, byte) in output.iter_mut().zip(FrameEncoder::new(input)) {
        *slot = byte;
    }
    Some(needed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_bytes_pass_through() {
        let mut out = [0u8; 8];
        let n = encode_frame(&[0x41, 0x42], &mut out).unwrap();
        assert_eq!(&out[..n], &[FRAME_START, 0x41, 0x42, FRAME_END]);
    }

    #[test]
    fn test_start_byte_is_escaped() {
        let mut out = [0u8; 8];
        let n = encode_frame(&[0x02, 0xAA], &mut out).unwrap();
        assert_eq!(
            &out[..n],
            &[FRAME_START, FRAME_ESCAPE, FRAME_ESCAPE ^ FRAME_START, 0xAA, FRAME_END]
        );
    }

    #[test]
    fn test_all_reserved_bytes_escaped() {
        let payload = [FRAME_END, FRAME_ESCAPE, FRAME_START];
        let mut out = [0u8; 16];
        let n = encode_frame(&payload, &mut out).unwrap();
        assert_eq!(n, encoded_len(&payload));
        assert_eq!(n, 8);
        // no delimiter may appear between the outer START and END
        assert!(out[1..n - 1].iter().all(|&b| b != FRAME_START && b != FRAME_END));
        assert_eq!(unescape(out[2]), FRAME_END);
        assert_eq!(unescape(out[4]), FRAME_ESCAPE);
        assert_eq!(unescape(out[6]), FRAME_START);
    }

    #[test]
    fn test_output_too_small() {
        let mut out = [0u8; 3];
        assert_eq!(encode_frame(&[0x41, 0x42], &mut out), None);
    }

    #[test]
    fn test_empty_payload() {
        let encoded: heapless::Vec<u8, 4> = FrameEncoder::new(&[]).collect();
        assert_eq!(&encoded[..], &[FRAME_START, FRAME_END]);
    }
}
