//! DER encoding of instances.
//!
//! This is a private module. Encoding is exposed as [`Instance::der`].
//!
//! Encoding is a single recursive pass: the tag bytes of a node are
//! appended together with their one-byte length placeholders, the content
//! is encoded, and then the placeholders are patched from the innermost
//! tag outward. A length of up to 127 fits the reserved byte; longer
//! contents splice the extra length octets in.

use num_bigint::BigInt;
use crate::node::{BasicType, Instance, Value};

impl Instance {
    /// Encodes the instance into DER bytes.
    ///
    /// # Panics
    ///
    /// Encoding panics on structurally invalid instances, e.g. a
    /// primitive instance without a value. Instances produced by
    /// [`Definitions::instantiate`][crate::Definitions::instantiate] are
    /// always valid.
    pub fn der(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_der(&mut out, self);
        out
    }
}

pub(crate) fn encode_der(out: &mut Vec<u8>, t: &Instance) {
    let start = out.len();
    out.extend_from_slice(&t.tags);
    let datastart = out.len();

    match t.basic {
        BasicType::Sequence | BasicType::Set | BasicType::Choice => {
            // Fields at their DEFAULT value must not be encoded in DER.
            let mut children: Vec<&Instance> =
                t.children.iter().filter(|c| !c.is_default).collect();
            if t.basic == BasicType::Set {
                // SET orders its fields by tag.
                children.sort_by(|a, b| {
                    a.tags.as_slice().cmp(b.tags.as_slice())
                });
            }
            for child in children {
                encode_der(out, child);
            }
        }
        BasicType::SequenceOf => {
            for child in &t.children {
                encode_der(out, child);
            }
        }
        BasicType::SetOf => {
            // DER orders SET OF elements by their encoding.
            let mut encodings: Vec<Vec<u8>> = t.children.iter().map(|c| {
                let mut buf = Vec::new();
                encode_der(&mut buf, c);
                buf
            }).collect();
            encodings.sort();
            for encoding in encodings {
                out.extend_from_slice(&encoding);
            }
        }
        BasicType::OctetString => {
            let bytes = match &t.value {
                Some(Value::Bytes(bytes)) => bytes,
                _ => panic!("unhandled case in encode_der"),
            };
            // The last byte of the tag sequence is the placeholder, so
            // the innermost tag sits just before it.
            if t.tags.len() >= 2 && t.tags[t.tags.len() - 2] == 30 {
                out.extend_from_slice(&encode_utf16_be(bytes));
            }
            else {
                out.extend_from_slice(bytes);
            }
        }
        BasicType::Boolean => {
            match t.value {
                Some(Value::Bool(true)) => out.push(0xff),
                Some(Value::Bool(false)) => out.push(0x00),
                _ => panic!("unhandled case in encode_der"),
            }
        }
        BasicType::Null => {}
        BasicType::Integer | BasicType::Enumerated => {
            let bytes = match &t.value {
                Some(Value::Int(value)) => {
                    BigInt::from(*value).to_signed_bytes_be()
                }
                Some(Value::Big(value)) => value.to_signed_bytes_be(),
                _ => panic!("unhandled case in encode_der"),
            };
            out.extend_from_slice(&bytes);
        }
        BasicType::BitString => {
            let bits = match &t.value {
                Some(Value::Bits(bits)) => bits,
                _ => panic!("unhandled case in encode_der"),
            };
            let unused = (8 - (bits.len() & 7)) & 7;
            out.push(unused as u8);
            let mut octet = 0u8;
            for (i, &bit) in bits.iter().enumerate() {
                octet <<= 1;
                if bit {
                    octet |= 1;
                }
                if (i + 1) & 7 == 0 {
                    out.push(octet);
                }
            }
            if unused > 0 {
                out.push(octet << unused);
            }
        }
        BasicType::ObjectIdentifier => {
            let oid = match &t.value {
                Some(Value::Oid(oid)) => oid,
                _ => panic!("unhandled case in encode_der"),
            };
            assert!(
                oid.len() >= 2,
                "OBJECT IDENTIFIER needs at least 2 components"
            );
            push_base128(out, 40 * oid[0] + oid[1]);
            for &component in &oid[2..] {
                push_base128(out, component);
            }
        }
        _ => panic!("unhandled case in encode_der"),
    }

    // Fill in all length placeholders with the actual lengths, innermost
    // first.
    let mut datastart = datastart;
    while datastart > start {
        let length = out.len() - datastart;
        if length <= 127 {
            out[datastart - 1] = length as u8;
        }
        else {
            let be = length.to_be_bytes();
            let skip = be.iter().position(|&b| b != 0).unwrap();
            let extra = be.len() - skip;
            out[datastart - 1] = 0x80 | extra as u8;
            out.splice(datastart..datastart, be[skip..].iter().copied());
        }
        datastart -= 1;
        while datastart > start && out[datastart - 1] != 0 {
            datastart -= 1;
        }
    }
}

/// Appends a value in base 128, big-endian, with continuation bits.
fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut scratch = [0u8; 10];
    let mut len = 0;
    loop {
        scratch[len] = (value & 0x7f) as u8;
        len += 1;
        value >>= 7;
        if value == 0 {
            break
        }
    }
    for i in (0..len).rev() {
        let mut byte = scratch[i];
        if i != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Encodes UTF-8 content as UTF-16 big-endian, two bytes per code point.
///
/// Code points outside the BMP are not supported and get truncated.
fn encode_utf16_be(bytes: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Vec::with_capacity(text.len() * 2);
    for ch in text.chars() {
        let unit = ch as u32;
        out.push((unit >> 8) as u8);
        out.push(unit as u8);
    }
    out
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use crate::instantiate::Data;
    use crate::node::Definitions;

    fn defs(src: &str) -> Definitions {
        let mut defs = Definitions::new();
        defs.parse(src).unwrap();
        defs
    }

    fn map(entries: &[(&str, Data)]) -> Data {
        Data::Map(
            entries.iter().map(|(k, v)| {
                (k.to_string(), v.clone())
            }).collect()
        )
    }

    #[test]
    fn sequence_with_default() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             T ::= SEQUENCE { a INTEGER, b BOOLEAN DEFAULT TRUE } END"
        );
        let inst = defs.instantiate(
            "T", &map(&[("a", Data::Int(5))])
        ).unwrap();
        assert_eq!(inst.der(), vec![0x30, 0x03, 0x02, 0x01, 0x05]);

        // Explicitly set to the default: still suppressed.
        let inst = defs.instantiate(
            "T", &map(&[("a", Data::Int(5)), ("b", Data::Bool(true))])
        ).unwrap();
        assert_eq!(inst.der(), vec![0x30, 0x03, 0x02, 0x01, 0x05]);

        let inst = defs.instantiate(
            "T", &map(&[("a", Data::Int(5)), ("b", Data::Bool(false))])
        ).unwrap();
        assert_eq!(
            inst.der(),
            vec![0x30, 0x06, 0x02, 0x01, 0x05, 0x01, 0x01, 0x00]
        );
    }

    #[test]
    fn implicit_application_tag() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             T ::= [APPLICATION 3] IMPLICIT OCTET STRING END"
        );
        let inst = defs.instantiate("T", &Data::Str("Hi".into())).unwrap();
        assert_eq!(inst.der(), vec![0x43, 0x02, 0x48, 0x69]);
    }

    #[test]
    fn explicit_context_tag() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             T ::= [0] EXPLICIT INTEGER END"
        );
        let inst = defs.instantiate("T", &Data::Int(5)).unwrap();
        assert_eq!(inst.der(), vec![0xa0, 0x03, 0x02, 0x01, 0x05]);
    }

    #[test]
    fn integer_edge_cases() {
        let defs = defs("DEFINITIONS IMPLICIT TAGS ::= BEGIN END");
        for (value, want) in [
            (0, vec![0x02, 0x01, 0x00]),
            (127, vec![0x02, 0x01, 0x7f]),
            (128, vec![0x02, 0x02, 0x00, 0x80]),
            (-128, vec![0x02, 0x01, 0x80]),
            (-129, vec![0x02, 0x02, 0xff, 0x7f]),
        ] {
            let inst = defs.instantiate(
                "INTEGER", &Data::Int(value)
            ).unwrap();
            assert_eq!(inst.der(), want, "for {}", value);
            // The same value as a big integer encodes identically.
            let inst = defs.instantiate(
                "INTEGER", &Data::Big(value.into())
            ).unwrap();
            assert_eq!(inst.der(), want, "for big {}", value);
        }
    }

    #[test]
    fn oid_encodings() {
        let defs = defs("DEFINITIONS IMPLICIT TAGS ::= BEGIN END");
        for (input, want) in [
            ("1.2", vec![0x06, 0x01, 0x2a]),
            (
                "1.2.840.113549",
                vec![0x06, 0x06, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d],
            ),
            ("2.999", vec![0x06, 0x02, 0x88, 0x37]),
            (
                "1.2.840.113549.1.1.11",
                vec![
                    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d,
                    0x01, 0x01, 0x0b,
                ],
            ),
        ] {
            let inst = defs.instantiate(
                "OBJECT_IDENTIFIER", &Data::Str(input.into())
            ).unwrap();
            assert_eq!(inst.der(), want, "for {}", input);
        }
    }

    #[test]
    fn bit_string_encoding() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             KeyUsage ::= BIT STRING { digitalSignature(0), \
             nonRepudiation(1), keyEncipherment(2) } END"
        );
        let inst = defs.instantiate(
            "KeyUsage", &Data::Str("0b10110".into())
        ).unwrap();
        assert_eq!(inst.der(), vec![0x03, 0x02, 0x03, 0xb0]);

        let inst = defs.instantiate(
            "KeyUsage", &Data::Str("digitalSignature keyEncipherment".into())
        ).unwrap();
        assert_eq!(inst.der(), vec![0x03, 0x02, 0x05, 0xa0]);

        let inst = defs.instantiate(
            "KeyUsage", &Data::Bools(Vec::new())
        ).unwrap();
        assert_eq!(inst.der(), vec![0x03, 0x01, 0x00]);
    }

    #[test]
    fn set_of_canonical_order() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             Bag ::= SET OF INTEGER END"
        );
        let a = defs.instantiate(
            "Bag",
            &Data::List(vec![Data::Int(300), Data::Int(5), Data::Int(7)])
        ).unwrap();
        let b = defs.instantiate(
            "Bag",
            &Data::List(vec![Data::Int(7), Data::Int(300), Data::Int(5)])
        ).unwrap();
        assert_eq!(a.der(), b.der());
        assert_eq!(
            a.der(),
            vec![
                0x31, 0x0a,
                0x02, 0x01, 0x05,
                0x02, 0x01, 0x07,
                0x02, 0x02, 0x01, 0x2c,
            ]
        );
    }

    #[test]
    fn set_orders_fields_by_tag() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             T ::= SET { b [1] BOOLEAN, a [0] INTEGER } END"
        );
        let inst = defs.instantiate(
            "T", &map(&[("a", Data::Int(1)), ("b", Data::Bool(true))])
        ).unwrap();
        assert_eq!(
            inst.der(),
            vec![0x31, 0x06, 0x80, 0x01, 0x01, 0x81, 0x01, 0xff]
        );
    }

    #[test]
    fn long_length_backpatching() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             T ::= SEQUENCE { payload OCTET STRING } END"
        );
        let payload = vec![0x55u8; 200];
        let inst = defs.instantiate(
            "T", &map(&[("payload", Data::Bytes(payload.clone().into()))])
        ).unwrap();
        let der = inst.der();
        // OCTET STRING: 04 81 C8 <200 bytes>; SEQUENCE: 30 81 CB.
        assert_eq!(&der[..6], &[0x30, 0x81, 0xcb, 0x04, 0x81, 0xc8]);
        assert_eq!(der.len(), 6 + 200);
        assert_eq!(&der[6..], payload.as_slice());
    }

    #[test]
    fn bmp_string_utf16() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             T ::= BMPString END"
        );
        let inst = defs.instantiate("T", &Data::Str("Hi".into())).unwrap();
        let der = inst.der();
        assert_eq!(der, vec![0x1e, 0x04, 0x00, 0x48, 0x00, 0x69]);

        // Decoding turns the UTF-16 back into UTF-8 and re-encodes the
        // same bytes.
        let decoded = crate::decode::unmarshal_der(&der).unwrap();
        let rebuilt = defs.instantiate(
            "T",
            &Data::Unm(std::sync::Arc::new(
                crate::decode::Unmarshalled::Constructed(decoded)
            ))
        ).unwrap();
        assert_eq!(
            rebuilt.value(),
            Some(&crate::node::Value::Bytes(
                "Hi".as_bytes().to_vec().into()
            ))
        );
        assert_eq!(rebuilt.der(), der);
    }

    #[test]
    fn choice_encodes_selected_alternative() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             C ::= CHOICE { num [0] INTEGER, flag [1] BOOLEAN } END"
        );
        let inst = defs.instantiate(
            "C", &map(&[("flag", Data::Bool(true))])
        ).unwrap();
        assert_eq!(inst.der(), vec![0x81, 0x01, 0xff]);
    }
}
