//! Wire form of a draw delta on the data channel.
//!
//! One JSON object per data channel message, fields in the order `x, y, prevX, prevY`:
//!
//! ```text
//! {"x":20.0,"y":20.0,"prevX":10.0,"prevY":10.0}
//! ```
//!
//! This is the shape browser clients put on the channel, so both directions interoperate.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::internal::error::Error;

/// "draw a straight line from (prev_x, prev_y) to (x, y)"
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawDelta {
    pub x: f64,
    pub y: f64,
    pub prev_x: f64,
    pub prev_y: f64,
}

impl DrawDelta {
    pub fn new(x: f64, y: f64, prev_x: f64, prev_y: f64) -> Self {
        Self {
            x,
            y,
            prev_x,
            prev_y,
        }
    }

    fn is_finite(&self) -> bool {
        [self.x, self.y, self.prev_x, self.prev_y]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// JSON has no encoding for NaN or infinity, so those are rejected here rather than sent as null
pub fn encode(delta: &DrawDelta) -> Result<Bytes, Error> {
    if !delta.is_finite() {
        return Err(Error::MalformedDelta(format!(
            "non-finite coordinate in {:?}",
            delta
        )));
    }
    serde_json::to_vec(delta)
        .map(Bytes::from)
        .map_err(|e| Error::MalformedDelta(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<DrawDelta, Error> {
    let delta: DrawDelta =
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedDelta(e.to_string()))?;
    if !delta.is_finite() {
        return Err(Error::MalformedDelta(format!(
            "non-finite coordinate in {:?}",
            delta
        )));
    }
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fields_in_wire_order() {
        let bytes = encode(&DrawDelta::new(20.0, 20.0, 10.0, 10.0)).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"x":20.0,"y":20.0,"prevX":10.0,"prevY":10.0}"#
        );
    }

    #[test]
    fn round_trips_fractional_and_negative_coordinates() {
        let samples = [
            DrawDelta::new(0.0, 0.0, 0.0, 0.0),
            DrawDelta::new(123.5, -7.25, 0.125, 499.75),
            DrawDelta::new(-0.5, 1e12, 4096.0, -1024.0625),
        ];
        for delta in samples {
            assert_eq!(decode(&encode(&delta).unwrap()).unwrap(), delta);
        }
    }

    #[test]
    fn decodes_browser_integer_coordinates() {
        let delta = decode(br#"{"x":30,"y":15,"prevX":20,"prevY":20}"#).unwrap();
        assert_eq!(delta, DrawDelta::new(30.0, 15.0, 20.0, 20.0));
    }

    #[test]
    fn missing_field_is_malformed() {
        let err = decode(br#"{"x":30,"y":15,"prevX":20}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedDelta(_)));
    }

    #[test]
    fn non_numeric_field_is_malformed() {
        let err = decode(br#"{"x":"30","y":15,"prevX":20,"prevY":20}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedDelta(_)));
    }

    #[test]
    fn truncated_input_is_malformed() {
        let full = encode(&DrawDelta::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        for len in 0..full.len() {
            assert!(
                matches!(decode(&full[..len]), Err(Error::MalformedDelta(_))),
                "prefix of length {} decoded",
                len
            );
        }
    }

    #[test]
    fn non_finite_delta_is_not_encoded() {
        let err = encode(&DrawDelta::new(f64::NAN, 0.0, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, Error::MalformedDelta(_)));
    }
}
