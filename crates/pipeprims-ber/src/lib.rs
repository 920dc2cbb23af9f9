//! X.690 BER/DER encoding on top of pipeprims stages.
//!
//! Values are read and written one tag-length-value frame at a time:
//! - [`Decoder`] opens a frame on any [`Readable`](pipeprims_stage::Readable)
//!   and is itself readable, so nested values decode without buffering
//! - [`Encoder`] collects content and writes the frame when closed
//! - [`Demux`] splits a stream of concatenated values into messages
//!
//! Only single-octet identifiers are supported.

pub mod decoder;
pub mod demux;
pub mod encoder;
pub mod error;
pub mod keyinfo;
pub mod length;
pub mod oid;
pub mod primitive;
pub mod reencode;
pub mod tag;

pub use decoder::{peek_tag, Decoder};
pub use demux::{Demux, DemuxConfig, DemuxState, Phase, Transition};
pub use encoder::{encode_header, encode_primitive, Encoder};
pub use error::{BerError, Result};
pub use keyinfo::{
    decode_private_key_info, decode_public_key_info, encode_private_key_info,
    encode_public_key_info, AlgorithmIdentifier, KeyMaterial, PrivateKeyInfo,
};
pub use length::{
    decode_definite_length, decode_length, encode_length, encode_length_into, encoded_len,
    parse_length, Length,
};
pub use oid::Oid;
pub use primitive::{
    decode_bit_string, decode_null, decode_octet_string, decode_text_string, decode_unsigned,
    encode_bit_string, encode_null, encode_octet_string, encode_text_string, encode_unsigned,
    BitString,
};
pub use reencode::reencode;
pub use tag::{Class, Tag};
