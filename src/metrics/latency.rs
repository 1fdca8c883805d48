//! One-way latency from ping replies

use crate::types::clock::tick_delta;

/// Latency estimate in milliseconds for a ping reply observed at `now`.
///
/// Round trip is the receiver-side delay minus the time the reply spent at the
/// sender; each delay unwraps one minute rollover. Half the round trip, in ms,
/// is `rtt_ticks / 2000`.
pub fn one_way_latency_ms(
    receiver_send_time: u32,
    sender_recv_time: u32,
    sender_send_time: u32,
    now: u32,
) -> f64 {
    let receiver_delay = tick_delta(now, receiver_send_time);
    let sender_delay = tick_delta(sender_send_time, sender_recv_time);
    (receiver_delay - sender_delay) as f64 / 2000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::clock::MINUTE_WRAP;
    use proptest::prelude::*;

    #[test]
    fn identical_times_are_zero() {
        assert_eq!(one_way_latency_ms(1234, 1234, 1234, 1234), 0.0);
    }

    #[test]
    fn receiver_delay_unwraps() {
        // 200_000 ticks round trip, no sender hold time
        assert_eq!(one_way_latency_ms(59_900_000, 0, 0, 100_000), 100.0);
    }

    #[test]
    fn sender_hold_time_is_subtracted() {
        assert_eq!(one_way_latency_ms(0, 10_000, 30_000, 50_000), 15.0);
    }

    proptest! {
        #[test]
        fn latency_is_bounded_by_one_minute(
            a in 0..MINUTE_WRAP, b in 0..MINUTE_WRAP, c in 0..MINUTE_WRAP, d in 0..MINUTE_WRAP
        ) {
            let latency = one_way_latency_ms(a, b, c, d);
            prop_assert!(latency.abs() < MINUTE_WRAP as f64 / 2000.0);
        }
    }
}
