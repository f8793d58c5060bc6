//! Fuzz-style property tests for the delta and frame codecs
//!
//! Decoders must reject arbitrary input gracefully, and the delta codec must
//! reproduce its target exactly for any base.

use proptest::prelude::*;
use skylane_net::{decode_frame, encode_frame, DeltaDecoder, DeltaEncoder, Packet, RemoteCall};

/// Target derived from `base` by a handful of edits, so matches are likely.
fn edited(base: &[u8], edits: &[(usize, u8)], tail: &[u8]) -> Vec<u8> {
    let mut target = base.to_vec();
    for &(at, byte) in edits {
        if !target.is_empty() {
            let i = at % target.len();
            target[i] = byte;
        }
    }
    target.extend_from_slice(tail);
    target
}

proptest! {
    /// Property: Arbitrary bytes don't crash the frame decoder
    #[test]
    fn arbitrary_bytes_dont_crash_frames(
        random_bytes in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        let _result = decode_frame(&random_bytes);
        // No panic = success
    }

    /// Property: Arbitrary delta streams don't crash the decoder
    #[test]
    fn arbitrary_delta_dont_crash(
        base in prop::collection::vec(any::<u8>(), 0..256),
        delta in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let mut decoder = DeltaDecoder::new();
        let _result = decoder.decode(&base, &delta);
    }

    /// Property: Decode inverts encode for unrelated buffers
    #[test]
    fn delta_roundtrips_random(
        base in prop::collection::vec(any::<u8>(), 0..1024),
        target in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        let delta = DeltaEncoder::new().encode(&base, &target);
        let mut decoder = DeltaDecoder::new();
        prop_assert_eq!(decoder.decode(&base, &delta).unwrap(), target.as_slice());
    }

    /// Property: Chained deltas over edited states reproduce every state
    #[test]
    fn delta_chain_roundtrips(
        first in prop::collection::vec(any::<u8>(), 0..512),
        steps in prop::collection::vec(
            (
                prop::collection::vec((any::<usize>(), any::<u8>()), 0..8),
                prop::collection::vec(any::<u8>(), 0..16),
            ),
            1..8,
        ),
    ) {
        let encoder = DeltaEncoder::new();
        let mut decoder = DeltaDecoder::new();
        let mut sender_base = first.clone();
        let mut receiver_base = first;

        for (edits, tail) in &steps {
            let next = edited(&sender_base, edits, tail);
            let delta = encoder.encode(&sender_base, &next);
            receiver_base = decoder.decode(&receiver_base, &delta).unwrap().to_vec();
            prop_assert_eq!(&receiver_base, &next);
            sender_base = next;
        }
    }

    /// Property: Snapshot remote calls roundtrip through frames
    #[test]
    fn snapshot_call_roundtrips(
        snapshot_id in any::<i32>(),
        data in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let packet = RemoteCall::Snapshot { snapshot_id, data }.into_packet();
        let encoded = encode_frame(&packet).unwrap();
        let (decoded, used) = decode_frame(&encoded).unwrap();

        prop_assert_eq!(used, encoded.len());
        prop_assert_eq!(decoded, packet);
    }

    /// Property: Client snapshot acks roundtrip
    #[test]
    fn client_snapshot_roundtrips(
        last_snapshot in any::<i32>(),
        snap_id in any::<i32>(),
    ) {
        let packet = Packet::ClientSnapshot { last_snapshot, snap_id };
        let encoded = encode_frame(&packet).unwrap();
        prop_assert_eq!(decode_frame(&encoded).unwrap().0, packet);
    }
}
