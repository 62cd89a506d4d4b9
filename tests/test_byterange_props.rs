//! Property tests for ByteRange placement, container splicing and
//! incremental appends.

use pdf_ltv::object::Object;
use pdf_ltv::parser::parse_object;
use pdf_ltv::signatures::byterange::{splice_contents, write_byte_range};
use pdf_ltv::signatures::{ByteRange, ByteRangeCalculator, Reservation};
use pdf_ltv::testing::hello_pdf;
use pdf_ltv::writer::IncrementalUpdate;
use pdf_ltv::{Error, PdfDocument};
use proptest::prelude::*;

const PLACEHOLDER: &str = "[0 9999999999 9999999999 9999999999]";

// A prefix, then a signature dictionary with both placeholders, then a tail.
// Returns the buffer, the dictionary start and the placeholder reservation.
fn reserved_buffer(prefix: &[u8], capacity: usize, tail: &[u8]) -> (Vec<u8>, usize, Reservation) {
    let mut buf = prefix.to_vec();
    let start = buf.len();
    buf.extend_from_slice(b"7 0 obj\n<< /Type /Sig /ByteRange ");
    let array = buf.len();
    buf.extend_from_slice(PLACEHOLDER.as_bytes());
    let array = array..buf.len();
    buf.extend_from_slice(b" /Contents ");
    let window = buf.len();
    buf.push(b'<');
    buf.extend(std::iter::repeat(b'0').take(capacity * 2));
    buf.push(b'>');
    let window = window..buf.len();
    buf.extend_from_slice(b" >>\nendobj\n");
    buf.extend_from_slice(tail);

    let reservation = ByteRangeCalculator::new(capacity).locate(&buf, array, window).unwrap();
    (buf, start, reservation)
}

fn arbitrary_bytes(max: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..max)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_splice_touches_only_the_window(
        prefix in arbitrary_bytes(256),
        tail in arbitrary_bytes(256),
        capacity in 1usize..256,
        fill in 0.0f64..=1.0,
    ) {
        let (mut buf, start, reservation) = reserved_buffer(&prefix, capacity, &tail);
        let end = buf.len() - tail.len();
        let calc = ByteRangeCalculator::new(capacity);
        prop_assert_eq!(reservation.capacity(), capacity);

        let container: Vec<u8> = (0..((capacity as f64 * fill) as usize)).map(|i| (i * 31 + 7) as u8).collect();
        let byte_range = calc.calculate_byte_range(buf.len(), &reservation);
        write_byte_range(&mut buf, &reservation, &byte_range).unwrap();
        splice_contents(&mut buf, &reservation, &container).unwrap();

        // Bytes outside the dictionary are untouched
        prop_assert_eq!(&buf[..start], &prefix[..]);
        prop_assert_eq!(&buf[end..], &tail[..]);

        prop_assert!(byte_range.covers(buf.len()));
        prop_assert!(byte_range.check_window(&buf).is_ok());

        let signed = byte_range.extract_signed_bytes(&buf).unwrap();
        prop_assert_eq!(signed.len(), buf.len() - byte_range.gap().len());

        // The window decodes to the container followed by zero padding
        let window = &buf[byte_range.gap()];
        let decoded = hex::decode(&window[1..window.len() - 1]).unwrap();
        prop_assert_eq!(decoded.len(), capacity);
        prop_assert_eq!(&decoded[..container.len()], &container[..]);
        prop_assert!(decoded[container.len()..].iter().all(|&b| b == 0));

        // The written ByteRange parses back to the same value
        let (_, array) = parse_object(&buf[reservation.byte_range.clone()]).unwrap();
        prop_assert_eq!(ByteRange::from_object(&array).unwrap(), byte_range);
    }

    #[test]
    fn test_oversized_container_leaves_buffer_alone(
        capacity in 1usize..128,
        extra in 1usize..64,
    ) {
        let (mut buf, _, reservation) = reserved_buffer(b"%PDF-1.7\n", capacity, b"%%EOF\n");
        let before = buf.clone();

        let container = vec![0xAB; capacity + extra];
        match splice_contents(&mut buf, &reservation, &container) {
            Err(Error::ReservationTooSmall { needed, reserved }) => {
                prop_assert_eq!(needed, capacity + extra);
                prop_assert_eq!(reserved, capacity);
            },
            other => prop_assert!(false, "unexpected result {:?}", other),
        }
        prop_assert_eq!(buf, before);
    }

    #[test]
    fn test_spans_outside_file_are_rejected(
        len in 1usize..512,
        offset2 in 0usize..1024,
        length2 in 0usize..1024,
    ) {
        let data = vec![b'x'; len];
        let range = ByteRange::new(0, len / 2, offset2, length2);
        let fits = len / 2 <= offset2 && offset2 + length2 <= len;
        prop_assert_eq!(range.extract_signed_bytes(&data).is_ok(), fits);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_incremental_append_preserves_prefix(values in prop::collection::vec(any::<i64>(), 1..8)) {
        let original = hello_pdf();
        let doc = PdfDocument::from_bytes(original.clone()).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        let refs: Vec<_> = values.iter().map(|&v| update.add_object(Object::Integer(v))).collect();
        let out = update.write().unwrap();

        prop_assert!(out.bytes.starts_with(&original));
        let reopened = PdfDocument::from_bytes(out.bytes).unwrap();
        prop_assert_eq!(reopened.revision_count(), 2);
        for (r, v) in refs.iter().zip(&values) {
            prop_assert_eq!(reopened.get_object(*r).unwrap(), Object::Integer(*v));
        }
    }
}
