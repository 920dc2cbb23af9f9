//! SubjectPublicKeyInfo (X.509) and PrivateKeyInfo (PKCS #8) framing.
//!
//! ```text
//! SubjectPublicKeyInfo ::= SEQUENCE {
//!     algorithm         AlgorithmIdentifier,
//!     subjectPublicKey  BIT STRING }
//!
//! PrivateKeyInfo ::= SEQUENCE {
//!     version              INTEGER (0),
//!     algorithm            AlgorithmIdentifier,
//!     privateKey           OCTET STRING,
//!     attributes       [0] IMPLICIT Attributes OPTIONAL }
//!
//! AlgorithmIdentifier ::= SEQUENCE {
//!     algorithm   OBJECT IDENTIFIER,
//!     parameters  ANY DEFINED BY algorithm OPTIONAL }
//! ```
//!
//! The key itself is encoded by its [`KeyMaterial`] implementation.

use bytes::Bytes;
use pipeprims_stage::{Queue, Readable, Writable};

use crate::decoder::{peek_tag, Decoder};
use crate::encoder::Encoder;
use crate::error::{BerError, Result};
use crate::oid::Oid;
use crate::primitive::{decode_unsigned, encode_null, encode_unsigned};
use crate::reencode::reencode;
use crate::tag::Tag;

/// Key material that can be framed as a public or private key info.
pub trait KeyMaterial: Sized {
    /// The algorithm identifier under which this key type is stored.
    fn algorithm() -> Oid;

    /// Write the algorithm parameters. Defaults to NULL.
    fn encode_parameters(&self, dst: &mut dyn Writable) -> Result<()> {
        encode_null(dst)
    }

    /// Write the key contents.
    fn encode_key(&self, dst: &mut dyn Writable) -> Result<()>;

    /// Read the key from `src`, which holds exactly `len` bytes of it.
    ///
    /// `parameters` are the DER-encoded algorithm parameters, if present.
    fn decode_key(src: &mut dyn Readable, parameters: Option<&[u8]>, len: usize) -> Result<Self>;
}

/// An algorithm OID with its parameters kept as encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmIdentifier {
    pub oid: Oid,
    pub parameters: Option<Bytes>,
}

impl AlgorithmIdentifier {
    pub fn encode<W: Writable + ?Sized>(&self, dst: &mut W) -> Result<()> {
        Encoder::scope(dst, Tag::SEQUENCE, |alg| {
            self.oid.encode(alg)?;
            if let Some(parameters) = &self.parameters {
                alg.put(parameters)?;
            }
            Ok(())
        })
    }

    pub fn decode<R: Readable + ?Sized>(src: &mut R) -> Result<Self> {
        Decoder::scope(src, Tag::SEQUENCE, |alg| {
            let oid = Oid::decode(alg)?;
            let parameters = collect_values(alg)?;
            Ok(Self { oid, parameters })
        })
    }
}

// Re-encode every value left in `decoder` and return them, or `None` if
// there are none.
fn collect_values<S: Readable + ?Sized>(decoder: &mut Decoder<'_, S>) -> Result<Option<Bytes>> {
    if decoder.end_reached()? {
        return Ok(None);
    }
    let mut out = Queue::new();
    while !decoder.end_reached()? {
        reencode(decoder, &mut out)?;
    }
    Ok(Some(out.pull_bytes(usize::MAX)))
}

fn expect_algorithm<K: KeyMaterial>(alg: &AlgorithmIdentifier) -> Result<()> {
    if alg.oid != K::algorithm() {
        return Err(BerError::InvalidValue("unexpected key algorithm"));
    }
    Ok(())
}

fn content_len<S: Readable + ?Sized>(decoder: &Decoder<'_, S>) -> Result<usize> {
    decoder.remaining().ok_or(BerError::IndefiniteNotAllowed)
}

pub fn encode_public_key_info<W, K>(dst: &mut W, key: &K) -> Result<()>
where
    W: Writable + ?Sized,
    K: KeyMaterial,
{
    Encoder::scope(dst, Tag::SEQUENCE, |spki| {
        Encoder::scope(spki, Tag::SEQUENCE, |alg| {
            K::algorithm().encode(alg)?;
            key.encode_parameters(alg)
        })?;
        Encoder::scope(spki, Tag::BIT_STRING, |bits| {
            bits.put_byte(0)?;
            key.encode_key(bits)
        })
    })
}

pub fn decode_public_key_info<K, R>(src: &mut R) -> Result<K>
where
    K: KeyMaterial,
    R: Readable + ?Sized,
{
    Decoder::scope(src, Tag::SEQUENCE, |spki| {
        let alg = AlgorithmIdentifier::decode(spki)?;
        expect_algorithm::<K>(&alg)?;
        Decoder::scope(spki, Tag::BIT_STRING, |bits| {
            if bits.read_byte()? != 0 {
                return Err(BerError::InvalidValue("public key has unused bits"));
            }
            let len = content_len(bits)?;
            K::decode_key(bits, alg.parameters.as_deref(), len)
        })
    })
}

/// A decoded private key with its optional attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKeyInfo<K> {
    pub key: K,
    /// The complete `[0]` attributes value, DER encoded.
    pub attributes: Option<Bytes>,
}

const ATTRIBUTES: Tag = Tag::context(0, true);

/// Write a PrivateKeyInfo. `attributes`, if given, must be a complete
/// encoded `[0]` value and is written as is.
pub fn encode_private_key_info<W, K>(dst: &mut W, key: &K, attributes: Option<&[u8]>) -> Result<()>
where
    W: Writable + ?Sized,
    K: KeyMaterial,
{
    Encoder::scope(dst, Tag::SEQUENCE, |pki| {
        encode_unsigned(pki, 0, Tag::INTEGER)?;
        Encoder::scope(pki, Tag::SEQUENCE, |alg| {
            K::algorithm().encode(alg)?;
            key.encode_parameters(alg)
        })?;
        Encoder::scope(pki, Tag::OCTET_STRING, |octets| key.encode_key(octets))?;
        if let Some(attributes) = attributes {
            if attributes.first() != Some(&ATTRIBUTES.octet()) {
                return Err(BerError::InvalidValue("attributes must be tagged [0]"));
            }
            pki.put(attributes)?;
        }
        Ok(())
    })
}

pub fn decode_private_key_info<K, R>(src: &mut R) -> Result<PrivateKeyInfo<K>>
where
    K: KeyMaterial,
    R: Readable + ?Sized,
{
    Decoder::scope(src, Tag::SEQUENCE, |pki| {
        decode_unsigned(pki, Tag::INTEGER, 0..=0)?;
        let alg = AlgorithmIdentifier::decode(pki)?;
        expect_algorithm::<K>(&alg)?;
        let key = Decoder::scope(pki, Tag::OCTET_STRING, |octets| {
            let len = content_len(octets)?;
            K::decode_key(octets, alg.parameters.as_deref(), len)
        })?;

        let attributes = match peek_tag(&*pki)? {
            Some(ATTRIBUTES) => {
                let mut out = Queue::new();
                reencode(pki, &mut out)?;
                Some(out.pull_bytes(usize::MAX))
            }
            _ => None,
        };
        Ok(PrivateKeyInfo { key, attributes })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A toy RSA key: just the modulus and exponent as small integers.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct ToyRsa {
        n: u64,
        e: u64,
    }

    impl KeyMaterial for ToyRsa {
        fn algorithm() -> Oid {
            Oid::new([1u32, 2, 840, 113_549, 1, 1, 1]).unwrap()
        }

        fn encode_key(&self, dst: &mut dyn Writable) -> Result<()> {
            Encoder::scope(dst, Tag::SEQUENCE, |seq| {
                encode_unsigned(seq, self.n, Tag::INTEGER)?;
                encode_unsigned(seq, self.e, Tag::INTEGER)
            })
        }

        fn decode_key(src: &mut dyn Readable, parameters: Option<&[u8]>, _len: usize) -> Result<Self> {
            if parameters != Some(&[0x05, 0x00][..]) {
                return Err(BerError::InvalidValue("RSA parameters must be NULL"));
            }
            Decoder::scope(src, Tag::SEQUENCE, |seq| {
                let n = decode_unsigned(seq, Tag::INTEGER, 1..=u64::MAX)?;
                let e = decode_unsigned(seq, Tag::INTEGER, 1..=u64::MAX)?;
                Ok(ToyRsa { n, e })
            })
        }
    }

    const KEY: ToyRsa = ToyRsa { n: 3233, e: 17 };

    #[test]
    fn algorithm_identifier_wire_form() {
        let alg = AlgorithmIdentifier {
            oid: ToyRsa::algorithm(),
            parameters: Some(Bytes::from_static(&[0x05, 0x00])),
        };
        let mut out = Queue::new();
        alg.encode(&mut out).unwrap();
        assert_eq!(
            out.to_vec(),
            [0x30, 0x0D, 0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01, 0x05, 0x00]
        );
        assert_eq!(AlgorithmIdentifier::decode(&mut out).unwrap(), alg);
    }

    #[test]
    fn algorithm_identifier_without_parameters() {
        let mut src = Queue::from(&[0x30, 0x03, 0x06, 0x01, 0x2A][..]);
        let alg = AlgorithmIdentifier::decode(&mut src).unwrap();
        assert_eq!(alg.oid.arcs(), [1, 2]);
        assert_eq!(alg.parameters, None);
    }

    #[test]
    fn public_key_info_round_trip() {
        let mut out = Queue::new();
        encode_public_key_info(&mut out, &KEY).unwrap();

        let bytes = out.to_vec();
        assert_eq!(bytes[0], 0x30);
        // BIT STRING with zero unused bits follows the algorithm identifier.
        assert_eq!(&bytes[17..20], [0x03, 0x0A, 0x00]);

        let key: ToyRsa = decode_public_key_info(&mut out).unwrap();
        assert_eq!(key, KEY);
        assert!(out.is_empty());
    }

    #[test]
    fn public_key_with_unused_bits_is_rejected() {
        let mut out = Queue::new();
        encode_public_key_info(&mut out, &KEY).unwrap();
        let mut bytes = out.to_vec();
        bytes[19] = 0x01;

        let mut src = Queue::from(bytes);
        let err = decode_public_key_info::<ToyRsa, _>(&mut src).unwrap_err();
        assert!(matches!(err.primary(), BerError::InvalidValue(_)));
    }

    #[test]
    fn private_key_info_round_trip_with_attributes() {
        let attributes = [0xA0, 0x02, 0x05, 0x00];
        let mut out = Queue::new();
        encode_private_key_info(&mut out, &KEY, Some(&attributes)).unwrap();

        let info: PrivateKeyInfo<ToyRsa> = decode_private_key_info(&mut out).unwrap();
        assert_eq!(info.key, KEY);
        assert_eq!(info.attributes.as_deref(), Some(&attributes[..]));
    }

    #[test]
    fn private_key_info_without_attributes() {
        let mut out = Queue::new();
        encode_private_key_info(&mut out, &KEY, None).unwrap();
        assert_eq!(&out.to_vec()[..5], [0x30, 0x1D, 0x02, 0x01, 0x00]);

        let info: PrivateKeyInfo<ToyRsa> = decode_private_key_info(&mut out).unwrap();
        assert_eq!(info.attributes, None);
    }

    #[test]
    fn wrong_algorithm_yields_no_key() {
        let other = AlgorithmIdentifier {
            oid: "1.2.3".parse().unwrap(),
            parameters: None,
        };
        let mut out = Queue::new();
        Encoder::scope(&mut out, Tag::SEQUENCE, |spki| {
            other.encode(spki)?;
            encode_null(spki)
        })
        .unwrap();

        assert!(decode_public_key_info::<ToyRsa, _>(&mut out).is_err());
    }

    #[test]
    fn truncated_key_info_fails_once() {
        let mut out = Queue::new();
        encode_public_key_info(&mut out, &KEY).unwrap();
        let bytes = out.to_vec();

        let mut src = Queue::from(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            decode_public_key_info::<ToyRsa, _>(&mut src),
            Err(BerError::Truncated { .. })
        ));
    }
}
