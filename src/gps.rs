//! Minimal NMEA `$GPGLL` decoding for the GPS collaborator

use std::io::BufRead;

use tracing::trace;

use crate::types::Position;

/// Position from a `$GPGLL` sentence.
///
/// Coordinates are `ddmm.mmmm` / `dddmm.mmmm`; southern and western hemispheres
/// are negative. Returns `None` for other sentences, empty fields, or
/// out-of-range results.
pub fn parse_gpgll(sentence: &str) -> Option<Position> {
    let mut fields = sentence.trim().split(',');
    if fields.next()? != "$GPGLL" {
        return None;
    }

    let latitude = dmm_to_degrees(fields.next()?)?;
    let lat_sign = hemisphere_sign(fields.next()?, 'N', 'S')?;
    let longitude = dmm_to_degrees(fields.next()?)?;
    let lon_sign = hemisphere_sign(fields.next()?, 'E', 'W')?;

    let position = Position::new(latitude * lat_sign, longitude * lon_sign);
    position.is_valid().then_some(position)
}

/// Feed every valid `$GPGLL` fix read from `reader` to `on_fix`.
///
/// Stops at end of input, on a read error, or when `on_fix` returns false.
/// Returns the number of fixes delivered.
pub fn read_fixes<R: BufRead>(reader: R, mut on_fix: impl FnMut(Position) -> bool) -> usize {
    let mut fixes = 0;
    for line in reader.lines() {
        let Ok(line) = line else { break };
        let Some(position) = parse_gpgll(&line) else {
            continue;
        };
        trace!("GPS fix {:.6}, {:.6}", position.latitude, position.longitude);
        fixes += 1;
        if !on_fix(position) {
            break;
        }
    }
    fixes
}

fn dmm_to_degrees(field: &str) -> Option<f64> {
    let raw: f64 = field.parse().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    Some(degrees + minutes / 60.0)
}

fn hemisphere_sign(field: &str, positive: char, negative: char) -> Option<f64> {
    match field.chars().next() {
        None => Some(1.0),
        Some(c) if c == positive => Some(1.0),
        Some(c) if c == negative => Some(-1.0),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_northern_eastern_fix() {
        let position = parse_gpgll("$GPGLL,3734.2172,N,12659.0166,E,063012.00,A,A*6B\r\n").unwrap();
        assert!((position.latitude - 37.570287).abs() < 1e-6);
        assert!((position.longitude - 126.983610).abs() < 1e-6);
    }

    #[test]
    fn southern_western_hemispheres_are_negative() {
        let position = parse_gpgll("$GPGLL,3351.0000,S,15112.0000,W,000000.00,A").unwrap();
        assert!((position.latitude + 33.85).abs() < 1e-9);
        assert!((position.longitude + 151.2).abs() < 1e-9);
    }

    #[test]
    fn reader_skips_other_sentences() {
        let input = "$GPGGA,123519,4807.038,N,01131.000,E\n\
                     $GPGLL,3734.2172,N,12659.0166,E,063012.00,A\n\
                     garbage\n\
                     $GPGLL,3734.3000,N,12659.1000,E,063013.00,A\n";
        let mut fixes = Vec::new();
        let count = read_fixes(input.as_bytes(), |p| {
            fixes.push(p);
            true
        });
        assert_eq!(count, 2);
        assert!(fixes[1].latitude > fixes[0].latitude);

        let first_only = read_fixes(input.as_bytes(), |_| false);
        assert_eq!(first_only, 1);
    }

    #[test]
    fn rejects_other_sentences_and_bad_fields() {
        assert!(parse_gpgll("$GPGGA,123519,4807.038,N,01131.000,E").is_none());
        assert!(parse_gpgll("$GPGLL,,,,,063012.00,V").is_none());
        assert!(parse_gpgll("$GPGLL,9500.0000,N,00000.0000,E").is_none());
        assert!(parse_gpgll("$GPGLL,3734.2172,X,12659.0166,E").is_none());
    }
}
