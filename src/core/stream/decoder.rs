//! Packet decoding
//! Converts routed frames into typed samples.

use crate::core::bluetooth::error::DecodeError;
use crate::core::bluetooth::types::{DecodedSample, RawFrame};

/// Width of one ADC sample on the wire
pub const ADC_SAMPLE_SIZE: usize = 2;

/// Decodes a routed frame according to its channel.
pub fn decode(frame: &RawFrame) -> Result<DecodedSample, DecodeError> {
    if frame.channel.is_binary() {
        decode_adc(&frame.bytes).map(DecodedSample::Adc)
    } else {
        decode_record(&frame.bytes).map(DecodedSample::Record)
    }
}

/// Little-endian u16 reinterpreted as two's-complement i16.
///
/// Frames shorter than two bytes are rejected; there is no buffering of
/// partial frames across notifications. Bytes past the first two are ignored.
pub fn decode_adc(bytes: &[u8]) -> Result<i16, DecodeError> {
    match bytes {
        [lo, hi, ..] => Ok(i16::from_le_bytes([*lo, *hi])),
        _ => Err(DecodeError::TooShort(bytes.len())),
    }
}

/// One text record with trailing whitespace and NUL padding removed.
///
/// A bare prefix such as `EMG,` yields an empty record, which is still delivered.
pub fn decode_record(bytes: &[u8]) -> Result<String, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    let record = text.trim_end_matches(|c: char| c.is_whitespace() || c == '\0');
    Ok(record.to_string())
}
