use pipeprims_stage::{Readable, Writable};

use crate::decoder::{peek_tag, Decoder};
use crate::encoder::{encode_primitive, Encoder};
use crate::error::{BerError, Result};

/// Copy one BER value from `src` to `dst` in DER form.
///
/// Indefinite lengths become definite and constructed values are rewritten
/// member by member, so nested indefinite values are converted too.
pub fn reencode(src: &mut dyn Readable, dst: &mut dyn Writable) -> Result<()> {
    let tag = peek_tag(src)?.ok_or(BerError::Truncated {
        needed: 1,
        available: 0,
    })?;
    Decoder::scope(src, tag, |value| {
        if tag.is_constructed() {
            Encoder::scope(dst, tag, |members| {
                while !value.end_reached()? {
                    reencode(value, members)?;
                }
                Ok(())
            })
        } else {
            encode_primitive(dst, tag, &value.read_remaining()?)
        }
    })
}
