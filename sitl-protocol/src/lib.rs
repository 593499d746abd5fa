//! Binary UDP frame codec for the plugin ↔ autopilot SITL link.
//!
//! One datagram carries exactly one frame, no header and no version
//! negotiation; version compatibility is a deployment concern. All fields
//! are little-endian.
//!
//! Outbound (plugin → autopilot), fixed 40 bytes:
//! ```text
//! [0..8]    sim_time_s    : f64
//! [8..24]   quaternion    : 4 × f32  [w, x, y, z]
//! [24..32]  latitude_deg  : f64
//! [32..40]  longitude_deg : f64
//! ```
//!
//! Inbound (autopilot → plugin), 10 + 4·N bytes:
//! ```text
//! [0..8]    sim_time_s    : f64
//! [8..10]   channel_count : u16  (1..=16)
//! [10..]    channels      : N × f32, normalized [-1, 1]
//! ```

use sitl_schema::{ActuatorCommand, StateSnapshot, MAX_CHANNELS};

/// Size of an encoded state frame in bytes.
pub const STATE_FRAME_LEN: usize = 40;

/// Size of an encoded command frame with `n` channels.
pub const fn command_frame_len(n: usize) -> usize {
    10 + 4 * n
}

/// Largest command frame the decoder will accept.
pub const MAX_COMMAND_FRAME_LEN: usize = command_frame_len(MAX_CHANNELS);

// ── FrameError ───────────────────────────────────────────────────────────────

/// Validation failures while decoding a datagram.
///
/// Callers log the error and drop the frame; a malformed frame is never
/// fatal to the session.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {got} bytes, need {need}")]
    TooShort { got: usize, need: usize },

    #[error("frame has {got} trailing bytes past the declared payload")]
    TrailingBytes { got: usize },

    #[error("channel count {0} outside 1..={MAX_CHANNELS}")]
    BadChannelCount(u16),
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Encode a [`StateSnapshot`] into a 40-byte outbound frame.
pub fn encode_state(snap: &StateSnapshot) -> Vec<u8> {
    let mut v = Vec::with_capacity(STATE_FRAME_LEN);
    v.extend_from_slice(&snap.sim_time_s.to_le_bytes());
    for q in &snap.quaternion {
        v.extend_from_slice(&q.to_le_bytes());
    }
    v.extend_from_slice(&snap.latitude_deg.to_le_bytes());
    v.extend_from_slice(&snap.longitude_deg.to_le_bytes());
    v
}

/// Encode an [`ActuatorCommand`] into an inbound frame.
///
/// The channel count is taken from the command itself; callers are expected
/// to have fixed it at session start.
pub fn encode_command(cmd: &ActuatorCommand) -> Vec<u8> {
    let n = cmd.channels.len().min(MAX_CHANNELS);
    let mut v = Vec::with_capacity(command_frame_len(n));
    v.extend_from_slice(&cmd.sim_time_s.to_le_bytes());
    v.extend_from_slice(&(n as u16).to_le_bytes());
    for c in &cmd.channels[..n] {
        v.extend_from_slice(&c.to_le_bytes());
    }
    v
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Decode a 40-byte outbound frame back into a [`StateSnapshot`].
pub fn decode_state(buf: &[u8]) -> Result<StateSnapshot, FrameError> {
    if buf.len() < STATE_FRAME_LEN {
        return Err(FrameError::TooShort {
            got: buf.len(),
            need: STATE_FRAME_LEN,
        });
    }
    if buf.len() > STATE_FRAME_LEN {
        return Err(FrameError::TrailingBytes {
            got: buf.len() - STATE_FRAME_LEN,
        });
    }

    let quaternion = [
        read_f32(buf, 8),
        read_f32(buf, 12),
        read_f32(buf, 16),
        read_f32(buf, 20),
    ];
    Ok(StateSnapshot {
        sim_time_s: read_f64(buf, 0),
        quaternion,
        latitude_deg: read_f64(buf, 24),
        longitude_deg: read_f64(buf, 32),
    })
}

/// Decode an inbound frame into an [`ActuatorCommand`].
///
/// The declared channel count must match the datagram length exactly; a
/// mismatch is rejected so a truncated or corrupt frame can never apply a
/// partial command.
pub fn decode_command(buf: &[u8]) -> Result<ActuatorCommand, FrameError> {
    if buf.len() < command_frame_len(1) {
        return Err(FrameError::TooShort {
            got: buf.len(),
            need: command_frame_len(1),
        });
    }

    let count = read_u16(buf, 8);
    if count == 0 || count as usize > MAX_CHANNELS {
        return Err(FrameError::BadChannelCount(count));
    }

    let expected = command_frame_len(count as usize);
    if buf.len() < expected {
        return Err(FrameError::TooShort {
            got: buf.len(),
            need: expected,
        });
    }
    if buf.len() > expected {
        return Err(FrameError::TrailingBytes {
            got: buf.len() - expected,
        });
    }

    let channels = (0..count as usize)
        .map(|i| read_f32(buf, 10 + 4 * i))
        .collect();
    Ok(ActuatorCommand {
        sim_time_s: read_f64(buf, 0),
        channels,
    })
}

// ── Raw field readers ────────────────────────────────────────────────────────

fn read_f64(buf: &[u8], off: usize) -> f64 {
    f64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}
fn read_f32(buf: &[u8], off: usize) -> f32 {
    f32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}
fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snap() -> StateSnapshot {
        StateSnapshot {
            sim_time_s: 1234.5678,
            quaternion: [0.7071068, 0.0, 0.7071068, 0.0],
            latitude_deg: -35.362938,
            longitude_deg: 149.165085,
        }
    }

    #[test]
    fn state_round_trip_is_bit_identical() {
        let original = make_snap();
        let frame = encode_state(&original);
        assert_eq!(frame.len(), STATE_FRAME_LEN);

        let decoded = decode_state(&frame).expect("decode failed");
        assert_eq!(decoded.sim_time_s.to_bits(), original.sim_time_s.to_bits());
        for i in 0..4 {
            assert_eq!(
                decoded.quaternion[i].to_bits(),
                original.quaternion[i].to_bits()
            );
        }
        assert_eq!(
            decoded.latitude_deg.to_bits(),
            original.latitude_deg.to_bits()
        );
        assert_eq!(
            decoded.longitude_deg.to_bits(),
            original.longitude_deg.to_bits()
        );
    }

    #[test]
    fn command_round_trip_is_bit_identical() {
        let original = ActuatorCommand {
            sim_time_s: 42.25,
            channels: vec![0.1, -0.2, 0.3, 0.0],
        };
        let frame = encode_command(&original);
        assert_eq!(frame.len(), 26);

        let decoded = decode_command(&frame).expect("decode failed");
        assert_eq!(decoded.sim_time_s.to_bits(), original.sim_time_s.to_bits());
        assert_eq!(decoded.channels.len(), 4);
        for i in 0..4 {
            assert_eq!(
                decoded.channels[i].to_bits(),
                original.channels[i].to_bits()
            );
        }
    }

    #[test]
    fn four_channel_frame_is_26_bytes() {
        assert_eq!(command_frame_len(4), 26);
    }

    #[test]
    fn state_decode_rejects_short_buffer() {
        let frame = encode_state(&make_snap());
        let err = decode_state(&frame[..STATE_FRAME_LEN - 1]).unwrap_err();
        assert!(matches!(err, FrameError::TooShort { .. }));
    }

    #[test]
    fn state_decode_rejects_trailing_bytes() {
        let mut frame = encode_state(&make_snap());
        frame.push(0);
        assert_eq!(
            decode_state(&frame).unwrap_err(),
            FrameError::TrailingBytes { got: 1 }
        );
    }

    #[test]
    fn command_decode_rejects_zero_channels() {
        let mut frame = encode_command(&ActuatorCommand::neutral(1));
        frame[8..10].copy_from_slice(&0u16.to_le_bytes());
        assert_eq!(
            decode_command(&frame).unwrap_err(),
            FrameError::BadChannelCount(0)
        );
    }

    #[test]
    fn command_decode_rejects_oversized_channel_count() {
        let mut frame = encode_command(&ActuatorCommand::neutral(4));
        frame[8..10].copy_from_slice(&17u16.to_le_bytes());
        assert_eq!(
            decode_command(&frame).unwrap_err(),
            FrameError::BadChannelCount(17)
        );
    }

    #[test]
    fn command_decode_rejects_count_length_mismatch() {
        // Declares 8 channels but only carries 4.
        let mut frame = encode_command(&ActuatorCommand::neutral(4));
        frame[8..10].copy_from_slice(&8u16.to_le_bytes());
        let err = decode_command(&frame).unwrap_err();
        assert!(matches!(err, FrameError::TooShort { need: 42, .. }));
    }

    #[test]
    fn decode_never_panics_on_garbage() {
        for len in 0..64 {
            let garbage = vec![0xA5u8; len];
            let _ = decode_state(&garbage);
            let _ = decode_command(&garbage);
        }
    }

    #[test]
    fn max_channel_frame_within_bounds() {
        let cmd = ActuatorCommand::neutral(MAX_CHANNELS);
        let frame = encode_command(&cmd);
        assert_eq!(frame.len(), MAX_COMMAND_FRAME_LEN);
        let decoded = decode_command(&frame).unwrap();
        assert_eq!(decoded.channels.len(), MAX_CHANNELS);
    }

    #[test]
    fn encode_command_truncates_past_max_channels() {
        let cmd = ActuatorCommand::neutral(MAX_CHANNELS + 4);
        let frame = encode_command(&cmd);
        let decoded = decode_command(&frame).unwrap();
        assert_eq!(decoded.channels.len(), MAX_CHANNELS);
    }
}
