//! Wire framing for RPC envelopes
//!
//! ```text
//! offset          size         field
//! 0               4            length    (= payload_len + 8, big-endian)
//! 4               4            magic     "RPC0"
//! 8               payload_len  payload   serialized RpcEnvelope
//! 8+payload_len   4            checksum  adler-32 over bytes[4 .. 8+payload_len), big-endian
//! ```

use bincode::Options;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::RpcEnvelope;

/// Protocol magic following the length prefix
pub const MAGIC: &[u8; 4] = b"RPC0";

/// Size of the length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Smallest legal `length` value (magic + checksum, empty payload)
pub const MIN_FRAME_LEN: u32 = 8;

/// Largest `length` a peer may announce
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

const CHECKSUM_LEN: usize = 4;

/// Errors detected while decoding a frame. All of them are fatal for the
/// connection the bytes came from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length {0}")]
    InvalidLength(u32),
    
    #[error("unknown message type {0:?}")]
    UnknownMessageType([u8; 4]),
    
    #[error("checksum mismatch: frame carries {expected:#010x}, computed {computed:#010x}")]
    CheckSumError { expected: u32, computed: u32 },
    
    #[error("failed to parse envelope: {0}")]
    ParseError(String),
    
    #[error("failed to encode envelope: {0}")]
    EncodeError(String),
}

/// Outcome of [`try_decode_one`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The buffer does not hold a complete frame yet
    NeedMoreData,
    /// One frame was decoded from the front of the buffer
    Frame {
        envelope: RpcEnvelope,
        consumed: usize,
    },
}

/// adler-32 as used on the wire
pub fn checksum(bytes: &[u8]) -> u32 {
    adler2::adler32_slice(bytes)
}

fn payload_options() -> impl Options {
    bincode::DefaultOptions::new()
}

/// Encode an envelope into a new frame
pub fn encode(envelope: &RpcEnvelope) -> Result<Bytes, FrameError> {
    let mut dst = BytesMut::new();
    encode_into(envelope, &mut dst)?;
    Ok(dst.freeze())
}

/// Append the frame for `envelope` to `dst`
pub fn encode_into(envelope: &RpcEnvelope, dst: &mut BytesMut) -> Result<(), FrameError> {
    let payload = payload_options()
        .serialize(envelope)
        .map_err(|e| FrameError::EncodeError(e.to_string()))?;
    
    let length = u32::try_from(payload.len() + MAGIC.len() + CHECKSUM_LEN).map_err(|_| {
        FrameError::EncodeError(format!("payload of {} bytes does not fit a frame", payload.len()))
    })?;
    
    let mut adler = adler2::Adler32::new();
    adler.write_slice(MAGIC);
    adler.write_slice(&payload);
    
    dst.reserve(LENGTH_PREFIX_LEN + length as usize);
    dst.put_u32(length);
    dst.put_slice(MAGIC);
    dst.put_slice(&payload);
    dst.put_u32(adler.checksum());
    Ok(())
}

/// Try to decode one frame from the front of `stream`.
///
/// Nothing is consumed unless a whole frame is buffered. Checks run in order:
/// length bounds, completeness, checksum, magic, payload parse.
pub fn try_decode_one(stream: &[u8]) -> Result<Decoded, FrameError> {
    if stream.len() < LENGTH_PREFIX_LEN {
        return Ok(Decoded::NeedMoreData);
    }
    
    let length = u32::from_be_bytes([stream[0], stream[1], stream[2], stream[3]]);
    if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&length) {
        return Err(FrameError::InvalidLength(length));
    }
    
    let total = LENGTH_PREFIX_LEN + length as usize;
    if stream.len() < total {
        return Ok(Decoded::NeedMoreData);
    }
    
    let body = &stream[LENGTH_PREFIX_LEN..total];
    let (covered, mut trailer) = body.split_at(body.len() - CHECKSUM_LEN);
    let expected = trailer.get_u32();
    let computed = checksum(covered);
    if expected != computed {
        return Err(FrameError::CheckSumError { expected, computed });
    }
    
    let (magic, payload) = covered.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(FrameError::UnknownMessageType([magic[0], magic[1], magic[2], magic[3]]));
    }
    
    let envelope = payload_options()
        .with_limit(u64::from(MAX_FRAME_LEN))
        .deserialize(payload)
        .map_err(|e| FrameError::ParseError(e.to_string()))?;
    
    Ok(Decoded::Frame {
        envelope,
        consumed: total,
    })
}

/// Decode every complete frame buffered in `buf`, handing each envelope to
/// `on_envelope` in arrival order and consuming its bytes.
///
/// Stops at the first incomplete frame and returns the number of envelopes
/// delivered. On a decode error the offending bytes stay in `buf`; the
/// caller is expected to close the connection.
pub fn drain_frames<F>(buf: &mut BytesMut, mut on_envelope: F) -> Result<usize, FrameError>
where
    F: FnMut(RpcEnvelope),
{
    let mut delivered = 0;
    loop {
        match try_decode_one(buf)? {
            Decoded::NeedMoreData => return Ok(delivered),
            Decoded::Frame { envelope, consumed } => {
                buf.advance(consumed);
                delivered += 1;
                on_envelope(envelope);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageType, RpcError};
    use proptest::prelude::*;
    
    fn sample() -> RpcEnvelope {
        RpcEnvelope::request(42, "Echo.Echo", "Echo", b"Hello".to_vec())
    }
    
    fn decode_whole(frame: &[u8]) -> Result<RpcEnvelope, FrameError> {
        match try_decode_one(frame)? {
            Decoded::Frame { envelope, consumed } => {
                assert_eq!(consumed, frame.len());
                Ok(envelope)
            }
            Decoded::NeedMoreData => panic!("complete frame reported as partial"),
        }
    }
    
    /// Rewrite the trailing checksum so it matches the (modified) body again
    fn reseal(frame: &mut [u8]) {
        let end = frame.len() - CHECKSUM_LEN;
        let sum = checksum(&frame[LENGTH_PREFIX_LEN..end]);
        frame[end..].copy_from_slice(&sum.to_be_bytes());
    }
    
    #[test]
    fn test_frame_layout() {
        let frame = encode(&sample()).unwrap();
        let length = u32::from_be_bytes(frame[0..4].try_into().unwrap());
        assert_eq!(length as usize + LENGTH_PREFIX_LEN, frame.len());
        assert_eq!(&frame[4..8], MAGIC);
        
        let end = frame.len() - CHECKSUM_LEN;
        let trailer = u32::from_be_bytes(frame[end..].try_into().unwrap());
        assert_eq!(trailer, checksum(&frame[4..end]));
    }
    
    #[test]
    fn test_checksum_matches_reference_adler32() {
        // Well-known adler-32 test vector.
        assert_eq!(checksum(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(checksum(b""), 1);
    }
    
    #[test]
    fn test_round_trip_response_with_error() {
        let envelope = RpcEnvelope::error_response(3, RpcError::internal("boom"));
        let frame = encode(&envelope).unwrap();
        let decoded = decode_whole(&frame).unwrap();
        assert_eq!(decoded.message_type, MessageType::Response);
        assert_eq!(decoded, envelope);
    }
    
    #[test]
    fn test_bit_flip_in_payload_is_checksum_error() {
        let frame = encode(&sample()).unwrap();
        let end = frame.len() - CHECKSUM_LEN;
        for index in 8..end {
            for bit in 0..8 {
                let mut corrupted = frame.to_vec();
                corrupted[index] ^= 1 << bit;
                assert!(
                    matches!(decode_whole(&corrupted), Err(FrameError::CheckSumError { .. })),
                    "byte {} bit {} not detected",
                    index,
                    bit
                );
            }
        }
    }
    
    #[test]
    fn test_corrupted_magic() {
        let frame = encode(&sample()).unwrap();
        for index in 4..8 {
            let mut corrupted = frame.to_vec();
            corrupted[index] ^= 0x20;
            // Checksum runs first and covers the magic.
            assert!(matches!(
                decode_whole(&corrupted),
                Err(FrameError::CheckSumError { .. })
            ));
            
            reseal(&mut corrupted);
            assert!(matches!(
                decode_whole(&corrupted),
                Err(FrameError::UnknownMessageType(_))
            ));
        }
    }
    
    #[test]
    fn test_length_bounds() {
        let mut too_short = 7u32.to_be_bytes().to_vec();
        too_short.extend_from_slice(&[0; 16]);
        assert_eq!(try_decode_one(&too_short), Err(FrameError::InvalidLength(7)));
        
        let too_long = (MAX_FRAME_LEN + 1).to_be_bytes();
        assert_eq!(
            try_decode_one(&too_long),
            Err(FrameError::InvalidLength(67_108_865))
        );
        
        // At the ceiling with nothing buffered yet: just wait.
        let at_ceiling = MAX_FRAME_LEN.to_be_bytes();
        assert_eq!(try_decode_one(&at_ceiling), Ok(Decoded::NeedMoreData));
    }
    
    #[test]
    fn test_need_more_data() {
        let frame = encode(&sample()).unwrap();
        assert_eq!(try_decode_one(&[]), Ok(Decoded::NeedMoreData));
        assert_eq!(try_decode_one(&frame[..3]), Ok(Decoded::NeedMoreData));
        assert_eq!(
            try_decode_one(&frame[..frame.len() - 1]),
            Ok(Decoded::NeedMoreData)
        );
    }
    
    #[test]
    fn test_garbage_payload_is_parse_error() {
        let mut frame = BytesMut::new();
        frame.put_u32(8 + 3);
        frame.put_slice(MAGIC);
        frame.put_slice(&[0xff, 0xff, 0xff]);
        frame.put_u32(0);
        reseal(&mut frame);
        assert!(matches!(
            try_decode_one(&frame),
            Err(FrameError::ParseError(_))
        ));
    }
    
    #[test]
    fn test_drain_frames_reassembles_split_delivery() {
        let first = RpcEnvelope::response(1, b"one".to_vec());
        let second = RpcEnvelope::response(2, b"two".to_vec());
        let mut stream = BytesMut::new();
        encode_into(&first, &mut stream).unwrap();
        encode_into(&second, &mut stream).unwrap();
        
        // Split inside the second frame.
        let split = stream.len() - 5;
        let mut buf = BytesMut::from(&stream[..split]);
        let mut seen = Vec::new();
        
        assert_eq!(drain_frames(&mut buf, |e| seen.push(e)).unwrap(), 1);
        assert_eq!(seen, vec![first.clone()]);
        
        buf.extend_from_slice(&stream[split..]);
        assert_eq!(drain_frames(&mut buf, |e| seen.push(e)).unwrap(), 1);
        assert_eq!(seen, vec![first, second]);
        assert!(buf.is_empty());
    }
    
    #[test]
    fn test_drain_frames_stops_on_error() {
        let mut buf = BytesMut::new();
        encode_into(&sample(), &mut buf).unwrap();
        buf.put_u32(5);
        buf.put_slice(b"junk");
        
        let mut seen = 0;
        let result = drain_frames(&mut buf, |_| seen += 1);
        assert_eq!(result, Err(FrameError::InvalidLength(5)));
        assert_eq!(seen, 1);
        // Bad bytes are left for the caller to inspect.
        assert_eq!(buf.len(), 8);
    }
    
    fn envelope_strategy() -> impl Strategy<Value = RpcEnvelope> {
        (
            any::<bool>(),
            any::<u64>(),
            "[A-Za-z.]{0,24}",
            "[A-Za-z]{0,16}",
            proptest::collection::vec(any::<u8>(), 0..512),
        )
            .prop_map(|(is_request, id, service, method, body)| {
                if is_request {
                    RpcEnvelope::request(id, service, method, body)
                } else {
                    RpcEnvelope::response(id, body)
                }
            })
    }
    
    proptest! {
        #[test]
        fn prop_round_trip(envelope in envelope_strategy()) {
            let frame = encode(&envelope).unwrap();
            prop_assert_eq!(decode_whole(&frame).unwrap(), envelope);
        }
        
        #[test]
        fn prop_any_split_reassembles(envelope in envelope_strategy(), cut in any::<prop::sample::Index>()) {
            let frame = encode(&envelope).unwrap();
            let split = cut.index(frame.len());
            let mut buf = BytesMut::from(&frame[..split]);
            let mut seen = Vec::new();
            
            drain_frames(&mut buf, |e| seen.push(e)).unwrap();
            buf.extend_from_slice(&frame[split..]);
            drain_frames(&mut buf, |e| seen.push(e)).unwrap();
            
            prop_assert_eq!(seen, vec![envelope]);
            prop_assert!(buf.is_empty());
        }
    }
}
