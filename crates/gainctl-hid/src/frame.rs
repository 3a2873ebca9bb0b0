//! miniDSP command frames.
//!
//! Every outgoing report is 65 bytes: a `0x00` report id followed by a
//! 64-byte payload padded with `0xFF`. Commands end with an additive
//! checksum over the command bytes.

use gainctl_core::Gain;

/// Size of a report including the report id.
pub const REPORT_LEN: usize = 65;
/// Size of a report payload.
pub const PAYLOAD_LEN: usize = REPORT_LEN - 1;
/// Report id prefixed to every outgoing report.
pub const REPORT_ID: u8 = 0x00;
/// Filler for unused payload bytes.
pub const PAD_BYTE: u8 = 0xFF;

const GAIN_REQUEST: [u8; 5] = [0x05, 0x05, 0xFF, 0xDA, 0x02];
const GAIN_RESPONSE: [u8; 4] = [0x06, 0x05, 0xFF, 0xDA];
const WRITE_GAIN: [u8; 2] = [0x03, 0x42];
const WRITE_MUTE: [u8; 2] = [0x03, 0x17];

/// A complete outgoing report.
pub type Frame = [u8; REPORT_LEN];

/// Sum of `bytes` modulo 256.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Prefix the report id and pad `payload` to a full report.
///
/// Payload bytes beyond [`PAYLOAD_LEN`] are dropped.
#[must_use]
pub fn pad(payload: &[u8]) -> Frame {
    let mut frame = [PAD_BYTE; REPORT_LEN];
    frame[0] = REPORT_ID;
    let len = payload.len().min(PAYLOAD_LEN);
    frame[1..=len].copy_from_slice(&payload[..len]);
    frame
}

/// Build a frame from command bytes followed by their checksum.
fn command(body: &[u8]) -> Frame {
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.extend_from_slice(body);
    payload.push(checksum(body));
    pad(&payload)
}

/// Request the gain register.
#[must_use]
pub fn encode_gain_request() -> Frame {
    command(&GAIN_REQUEST)
}

/// Set the analog gain. Out-of-range levels were already clamped by [`Gain`].
#[must_use]
pub fn encode_write_gain(gain: Gain) -> Frame {
    command(&[WRITE_GAIN[0], WRITE_GAIN[1], gain.to_raw()])
}

/// Set or clear the digital mute bit.
#[must_use]
pub fn encode_write_mute(muted: bool) -> Frame {
    command(&[WRITE_MUTE[0], WRITE_MUTE[1], u8::from(muted)])
}

/// A decoded gain register response.
#[derive(Debug, Clone, PartialEq)]
pub struct GainResponse {
    /// Analog gain
    pub gain: Gain,
    /// Digital mute bit
    pub muted: bool,
}

/// Strip a leading report id, if any.
#[must_use]
pub fn strip_report_id(report: &[u8]) -> &[u8] {
    match report.split_first() {
        Some((&REPORT_ID, rest)) => rest,
        _ => report,
    }
}

/// Decode a gain register response.
///
/// Returns `None` for any other traffic on the bus; that is not an error.
#[must_use]
pub fn decode_gain_response(report: &[u8]) -> Option<GainResponse> {
    let body = strip_report_id(report);
    if body.len() < GAIN_RESPONSE.len() + 2 || body[..GAIN_RESPONSE.len()] != GAIN_RESPONSE {
        return None;
    }
    Some(GainResponse { gain: Gain::from_raw(body[4]), muted: body[5] != 0 })
}
