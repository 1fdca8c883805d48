//! Reassembly of the modem stream across arbitrary read boundaries

use proptest::prelude::*;
use sensorlink::types::{Frame, Position};
use sensorlink::wire::{
    DataUnit, HeaderLayout, ReassemblyBuffer, RxHeader, build_data_frame, build_ping_reply, decode,
};

fn video(sequence: u32, row: i16, len: usize) -> Vec<u8> {
    let pixels = vec![(sequence % 251) as u8; len];
    let unit = DataUnit::scanline(Position::new(37.5, 127.0), sequence, row, &pixels);
    build_data_frame(&RxHeader::default(), &unit).unwrap()
}

fn ping(t: u32) -> Vec<u8> {
    build_ping_reply(&RxHeader::default(), t, t + 1, t + 2)
}

fn sample_stream() -> Vec<u8> {
    let mut stream = Vec::new();
    stream.extend(video(1, 0, 900));
    stream.extend(ping(10));
    stream.extend(video(2, 1, 17));
    stream.extend(video(3, 2, 900));
    stream.extend(ping(20));
    stream
}

fn feed_chunks(stream: &[u8], cuts: &[usize]) -> (Vec<Frame>, usize) {
    let mut buffer = ReassemblyBuffer::with_capacity(4096);
    let mut frames = Vec::new();
    let mut start = 0;
    for &cut in cuts.iter().chain(std::iter::once(&stream.len())) {
        let cut = cut.clamp(start, stream.len());
        frames.extend(buffer.feed(&stream[start..cut], &HeaderLayout::INBOUND).frames);
        start = cut;
    }
    (frames, buffer.len())
}

#[test]
fn every_single_split_point_yields_the_same_frames() {
    let stream = sample_stream();
    let expected = decode(&stream, &HeaderLayout::INBOUND).frames;
    assert_eq!(expected.len(), 5);

    for cut in 0..=stream.len() {
        let (frames, retained) = feed_chunks(&stream, &[cut]);
        assert_eq!(frames, expected, "split at {}", cut);
        assert_eq!(retained, 0, "bytes left after split at {}", cut);
    }
}

#[test]
fn byte_at_a_time_delivery() {
    let stream = sample_stream();
    let cuts: Vec<usize> = (1..stream.len()).collect();
    let (frames, retained) = feed_chunks(&stream, &cuts);
    assert_eq!(frames.len(), 5);
    assert_eq!(retained, 0);
}

#[test]
fn noise_between_frames_is_skipped() {
    let mut stream = vec![0x00, 0x11, 0xF3, 0x00];
    stream.extend(video(7, 3, 900));
    stream.extend([0xF3, 0x17, 0x42]);
    stream.extend(ping(99));

    let (frames, retained) = feed_chunks(&stream, &[3, 50, 600]);
    assert_eq!(frames.len(), 2);
    assert_eq!(retained, 0);
    assert!(matches!(frames[1], Frame::Ping { receiver_send_time: 99, .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn random_read_boundaries_preserve_frames(mut cuts in prop::collection::vec(0usize..3000, 0..12)) {
        let stream = sample_stream();
        cuts.sort_unstable();
        let expected = decode(&stream, &HeaderLayout::INBOUND).frames;
        let (frames, retained) = feed_chunks(&stream, &cuts);
        prop_assert_eq!(frames, expected);
        prop_assert_eq!(retained, 0);
    }

    #[test]
    fn sequences_survive_chunking(
        lens in prop::collection::vec(0usize..1200, 1..8),
        chunk in 1usize..2048,
    ) {
        let mut stream = Vec::new();
        for (i, len) in lens.iter().enumerate() {
            stream.extend(video(i as u32, i as i16, *len));
        }
        let cuts: Vec<usize> = (chunk..stream.len()).step_by(chunk).collect();
        let (frames, _) = feed_chunks(&stream, &cuts);

        let sequences: Vec<u32> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Data(data) => data.sequence,
                _ => None,
            })
            .collect();
        prop_assert_eq!(sequences, (0..lens.len() as u32).collect::<Vec<_>>());
    }
}
