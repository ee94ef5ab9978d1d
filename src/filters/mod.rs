//! Byte-level filters applied to record buffers.
pub mod byteorder;
