use bytes::BytesMut;
use pipeprims::ber::{
    decode_length, decode_null, decode_octet_string, encode_null, encode_octet_string, reencode,
    BerError, Decoder, Demux, DemuxConfig, Encoder, Oid, Tag,
};
use pipeprims::stage::{
    Attachable, MessageQueue, MessageReadable, Queue, Readable, Source, Stage, TransformFilter,
    Writable,
};
use rstest::rstest;

const RSA_ALGORITHM: [u8; 15] = [
    0x30, 0x0D, 0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01, 0x05, 0x00,
];

#[test]
fn rsa_algorithm_identifier_encodes_and_decodes() {
    let oid: Oid = "1.2.840.113549.1.1.1".parse().unwrap();
    let mut out = Queue::new();
    Encoder::scope(&mut out, Tag::SEQUENCE, |seq| {
        oid.encode(seq)?;
        encode_null(seq)
    })
    .unwrap();
    assert_eq!(out.to_vec(), RSA_ALGORITHM);

    let decoded = Decoder::scope(&mut out, Tag::SEQUENCE, |seq| {
        let oid = Oid::decode(seq)?;
        decode_null(seq)?;
        Ok(oid)
    })
    .unwrap();
    assert_eq!(decoded.arcs(), [1, 2, 840, 113_549, 1, 1, 1]);
    assert!(out.is_empty());
}

fn write_nested<W: Writable + ?Sized>(dst: &mut W, indefinite: bool) -> pipeprims::ber::Result<()> {
    let inner = |seq: &mut dyn Writable| -> pipeprims::ber::Result<()> {
        encode_octet_string(seq, b"leaf")?;
        encode_null(seq)
    };
    if indefinite {
        Encoder::scope_indefinite(dst, Tag::SEQUENCE, |outer| {
            Encoder::scope_indefinite(outer, Tag::SEQUENCE, |seq| inner(seq))?;
            encode_octet_string(outer, b"tail")
        })
    } else {
        Encoder::scope(dst, Tag::SEQUENCE, |outer| {
            Encoder::scope(outer, Tag::SEQUENCE, |seq| inner(seq))?;
            encode_octet_string(outer, b"tail")
        })
    }
}

fn read_nested<R: Readable + ?Sized>(src: &mut R) -> pipeprims::ber::Result<(Vec<u8>, Vec<u8>)> {
    Decoder::scope(src, Tag::SEQUENCE, |outer| {
        let leaf = Decoder::scope(outer, Tag::SEQUENCE, |seq| {
            let leaf = decode_octet_string(seq)?;
            decode_null(seq)?;
            Ok(leaf)
        })?;
        let tail = decode_octet_string(outer)?;
        Ok((leaf.to_vec(), tail.to_vec()))
    })
}

#[test]
fn indefinite_and_definite_forms_decode_alike() {
    let mut definite = Queue::new();
    write_nested(&mut definite, false).unwrap();
    let mut indefinite = Queue::new();
    write_nested(&mut indefinite, true).unwrap();

    assert_eq!(&indefinite.to_vec()[..4], [0x30, 0x80, 0x30, 0x80]);
    assert_ne!(definite, indefinite);

    let mut normalized = Queue::new();
    reencode(&mut indefinite.clone(), &mut normalized).unwrap();
    assert_eq!(normalized, definite);

    let expected = (b"leaf".to_vec(), b"tail".to_vec());
    assert_eq!(read_nested(&mut definite).unwrap(), expected);
    assert_eq!(read_nested(&mut indefinite).unwrap(), expected);
}

#[rstest]
#[case(0)]
#[case(127)]
#[case(128)]
#[case(255)]
#[case(256)]
fn octet_string_round_trips_through_demux(#[case] len: usize) {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let mut encoded = Queue::new();
    encode_octet_string(&mut encoded, &data).unwrap();

    let demux = Demux::new(DemuxConfig::default(), Some(Box::new(MessageQueue::new())));
    let mut source = Source::from_queue(encoded, Some(Box::new(demux)));
    source.pump(None, true).unwrap();

    let sink = source.attachment_mut().get_mut().unwrap();
    let messages = sink.message_readable_mut().unwrap();
    assert_eq!(messages.messages(), 1);
    assert_eq!(&decode_octet_string(messages).unwrap()[..], &data[..]);
}

#[rstest]
#[case(1)]
#[case(3)]
fn demux_yields_exactly_k_messages(#[case] k: u64) {
    let mut input = Vec::new();
    for i in 0..k {
        // Alternate definite and two-level indefinite values.
        if i % 2 == 0 {
            input.extend_from_slice(&[0x02, 0x01, i as u8]);
        } else {
            input.extend_from_slice(&[0x30, 0x80, 0x30, 0x80, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00]);
        }
    }
    let trailer = [0x00, 0x00, 0xDE, 0xAD];
    input.extend_from_slice(&trailer);

    let mut demux = Demux::new(
        DemuxConfig {
            max_objects: Some(k),
            ..DemuxConfig::default()
        },
        Some(Box::new(MessageQueue::new())),
    );
    for chunk in input.chunks(2) {
        demux.put(chunk).unwrap();
    }
    assert_eq!(demux.objects(), k);

    let queue = demux.message_readable_mut().unwrap();
    assert_eq!(queue.messages() as u64, k);
    queue.skip_messages(k as usize).unwrap();

    let mut rest = [0u8; 8];
    let n = queue.pull(&mut rest).unwrap();
    assert_eq!(&rest[..n], trailer);
}

#[test]
fn length_one_past_usize_max_fails_at_the_length_field() {
    let octets = std::mem::size_of::<usize>() + 1;
    let mut field = vec![0x04, 0x80 | octets as u8, 0x01];
    field.extend(std::iter::repeat(0x00).take(octets - 1));

    for _ in 0..2 {
        let mut src = Queue::from(field.clone());
        assert!(matches!(
            decode_octet_string(&mut src),
            Err(BerError::LengthOverflow)
        ));

        let mut length_only = Queue::from(&field[1..]);
        assert!(matches!(
            decode_length(&mut length_only),
            Err(BerError::LengthOverflow)
        ));
    }
}

#[test]
fn explicit_close_is_not_repeated_on_drop() {
    let mut out = Queue::new();
    {
        let mut seq = Encoder::indefinite(&mut out, Tag::SEQUENCE).unwrap();
        encode_null(&mut seq).unwrap();
        seq.close().unwrap();
        seq.close().unwrap();
    }
    assert_eq!(out.to_vec(), [0x30, 0x80, 0x05, 0x00, 0x00, 0x00]);

    let mut src = Queue::from(&[0x30, 0x80, 0x00, 0x00, 0x30, 0x80, 0x00, 0x00][..]);
    {
        let mut seq = Decoder::sequence(&mut src).unwrap();
        seq.close().unwrap();
    }
    // The second value's end-of-contents is still there.
    assert_eq!(src.size(), 4);
}

#[test]
fn demux_feeds_a_transform_chain() {
    let mut source = Source::new(&[0x05, 0x00, 0x04, 0x01, 0x7F][..], None);
    source.attach(Box::new(Demux::new(DemuxConfig::default(), None)));
    source.attach(Box::new(TransformFilter::new(
        |input: &[u8], output: &mut BytesMut| output.extend(input.iter().map(|b| !b)),
        None,
    )));
    source.attach(Box::new(MessageQueue::new()));
    assert!(source.pump(None, true).unwrap().is_complete());

    let chain = source.attachment_mut().get_mut().unwrap();
    assert_eq!(chain.name(), "Demux");
    let messages = chain.message_readable_mut().unwrap();
    assert_eq!(messages.messages(), 2);
    let mut first = [0u8; 2];
    messages.pull(&mut first).unwrap();
    assert_eq!(first, [0xFA, 0xFF]);
}
