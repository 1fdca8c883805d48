//! Wire format, frame codec and frame builder.
//!
//! ## Stream Structure
//!
//! The modem stream is an unframed sequence of frames, each opening with a
//! 2-byte magic number. [`decode`] resynchronises on that magic byte by byte,
//! [`ReassemblyBuffer`] carries partial frames across reads, and the builder
//! functions produce the outbound side.
//!
//! ```rust
//! use sensorlink::types::{Frame, Position};
//! use sensorlink::wire::{DataUnit, HeaderLayout, TxHeader, build_data_frame, decode};
//!
//! let unit = DataUnit::scanline(Position::new(37.57, 126.98), 0, 0, &[0u8; 900]);
//! let bytes = build_data_frame(&TxHeader::default(), &unit)?;
//!
//! let decoded = decode(&bytes, &HeaderLayout::OUTBOUND);
//! assert!(matches!(decoded.frames[0], Frame::Data(_)));
//! # Ok::<(), sensorlink::LinkError>(())
//! ```

mod builder;
mod codec;
mod format;
mod reassembly;

pub use builder::{
    DataUnit, FrameBuilder, SEQUENCE_WRAP, SequenceCounter, build_data_frame, build_ping_reply,
    build_ping_request,
};
pub use codec::{DecodeWarning, Decoded, HeaderLayout, decode};
pub use format::*;
pub use reassembly::ReassemblyBuffer;
