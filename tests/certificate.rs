//! End-to-end round trips over an RFC 5280 certificate schema.

use std::collections::BTreeMap;
use std::sync::Arc;
use dertool::{
    cook, unmarshal_der, CookFunctions, Data, Definitions, Error,
    JsonParams, Unmarshalled,
};

/// The subset of the RFC 5280 ASN.1 module needed for certificates.
const RFC5280: &str = "\
DEFINITIONS EXPLICIT TAGS ::= BEGIN

Certificate ::= SEQUENCE {
    tbsCertificate       TBSCertificate,
    signatureAlgorithm   AlgorithmIdentifier,
    signatureValue       BIT STRING
}

TBSCertificate ::= SEQUENCE {
    version         [0] EXPLICIT Version DEFAULT v1,
    serialNumber         CertificateSerialNumber,
    signature            AlgorithmIdentifier,
    issuer               Name,
    validity             Validity,
    subject              Name,
    subjectPublicKeyInfo SubjectPublicKeyInfo,
    issuerUniqueID  [1] IMPLICIT UniqueIdentifier OPTIONAL,
    subjectUniqueID [2] IMPLICIT UniqueIdentifier OPTIONAL,
    extensions      [3] EXPLICIT Extensions OPTIONAL
}

Version ::= INTEGER { v1(0), v2(1), v3(2) }

CertificateSerialNumber ::= INTEGER

AlgorithmIdentifier ::= SEQUENCE {
    algorithm  OBJECT IDENTIFIER,
    parameters ANY DEFINED BY algorithm OPTIONAL
}

Name ::= CHOICE {
    rdnSequence RDNSequence
}

RDNSequence ::= SEQUENCE OF RelativeDistinguishedName

RelativeDistinguishedName ::= SET OF AttributeTypeAndValue

AttributeTypeAndValue ::= SEQUENCE {
    type  OBJECT IDENTIFIER,
    value ANY DEFINED BY type
}

Validity ::= SEQUENCE {
    notBefore Time,
    notAfter  Time
}

Time ::= CHOICE {
    utcTime     UTCTime,
    generalTime GeneralizedTime
}

SubjectPublicKeyInfo ::= SEQUENCE {
    algorithm        AlgorithmIdentifier,
    subjectPublicKey BIT STRING
}

UniqueIdentifier ::= BIT STRING

Extensions ::= SEQUENCE SIZE (1..MAX) OF Extension

Extension ::= SEQUENCE {
    extnID    OBJECT IDENTIFIER,
    critical  BOOLEAN DEFAULT FALSE,
    extnValue OCTET STRING
}

BasicConstraints ::= SEQUENCE {
    cA                BOOLEAN DEFAULT FALSE,
    pathLenConstraint INTEGER OPTIONAL
}

KeyUsage ::= BIT STRING {
    digitalSignature(0),
    nonRepudiation(1),
    keyEncipherment(2),
    dataEncipherment(3),
    keyAgreement(4),
    keyCertSign(5),
    cRLSign(6)
}

END
";

fn rfc5280() -> Definitions {
    let mut defs = Definitions::new();
    defs.parse(RFC5280).unwrap();
    defs
}

fn map(entries: &[(&str, Data)]) -> Data {
    let mut out = BTreeMap::new();
    for (key, value) in entries {
        out.insert(key.to_string(), value.clone());
    }
    Data::Map(out)
}

fn name(common_name: &str) -> Data {
    map(&[("rdnSequence", Data::List(vec![
        Data::List(vec![
            map(&[
                ("type", Data::Str("2.5.4.3".into())),
                ("value", Data::Str(common_name.into())),
            ]),
        ]),
    ]))])
}

fn algorithm(oid: &str) -> Data {
    map(&[
        ("algorithm", Data::Str(oid.into())),
        ("parameters", Data::Null),
    ])
}

/// Builds the data tree for a small but complete v3 certificate.
fn certificate_data(defs: &Definitions) -> Data {
    let basic_constraints = defs.instantiate(
        "BasicConstraints", &map(&[("cA", Data::Bool(true))])
    ).unwrap();
    let key_usage = defs.instantiate(
        "KeyUsage", &Data::Str("digitalSignature keyCertSign".into())
    ).unwrap();

    map(&[
        ("tbsCertificate", map(&[
            ("version", Data::Str("v3".into())),
            (
                "serialNumber",
                Data::Str("123456789012345678901234567890".into())
            ),
            ("signature", algorithm("1.2.840.113549.1.1.11")),
            ("issuer", name("Test CA")),
            ("validity", map(&[
                ("notBefore", map(&[
                    ("utcTime", Data::Str("230101000000Z".into())),
                ])),
                ("notAfter", map(&[
                    ("utcTime", Data::Str("330101000000Z".into())),
                ])),
            ])),
            ("subject", name("Test Leaf")),
            ("subjectPublicKeyInfo", map(&[
                ("algorithm", algorithm("1.2.840.113549.1.1.1")),
                (
                    "subjectPublicKey",
                    Data::Str("0x30 0D 02 06 00 AF FE 00 11 22 02 03 \
                               01 00 01".into())
                ),
            ])),
            ("extensions", Data::List(vec![
                map(&[
                    ("extnID", Data::Str("2.5.29.19".into())),
                    ("critical", Data::Bool(true)),
                    (
                        "extnValue",
                        Data::Bytes(basic_constraints.der().into())
                    ),
                ]),
                map(&[
                    ("extnID", Data::Str("2.5.29.15".into())),
                    ("extnValue", Data::Bytes(key_usage.der().into())),
                ]),
            ])),
        ])),
        ("signatureAlgorithm", algorithm("1.2.840.113549.1.1.11")),
        (
            "signatureValue",
            Data::Str("0x5A 5B 5C 5D 5E 5F 60 61 62 63 64 65 66 67".into())
        ),
    ])
}

#[test]
fn encode_decode_reencode_is_stable() {
    let defs = rfc5280();
    let cert = defs.instantiate(
        "Certificate", &certificate_data(&defs)
    ).unwrap();
    let original = cert.der();

    let decoded = unmarshal_der(&original).unwrap();
    let rebuilt = defs.instantiate(
        "Certificate",
        &Data::Unm(Arc::new(Unmarshalled::Constructed(decoded)))
    ).unwrap();
    assert_eq!(rebuilt.der(), original);
}

#[test]
fn absent_defaults_survive_the_round_trip() {
    let defs = rfc5280();
    // critical is absent and at its DEFAULT in the key usage extension.
    let ext = defs.instantiate("Extension", &map(&[
        ("extnID", Data::Str("2.5.29.15".into())),
        ("extnValue", Data::Bytes(vec![0x03, 0x02, 0x05, 0xa0].into())),
    ])).unwrap();
    let original = ext.der();
    assert!(!original.windows(3).any(|w| w == [0x01, 0x01, 0x00]));

    let decoded = unmarshal_der(&original).unwrap();
    let rebuilt = defs.instantiate(
        "Extension",
        &Data::Unm(Arc::new(Unmarshalled::Constructed(decoded)))
    ).unwrap();
    assert_eq!(rebuilt.der(), original);
}

#[test]
fn optional_fields_do_not_misalign_shared_tags() {
    let mut defs = Definitions::new();
    defs.parse(
        "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
         T ::= SEQUENCE { \
           a [0] INTEGER OPTIONAL, \
           b INTEGER, \
           c INTEGER \
         } END"
    ).unwrap();

    for entries in [
        vec![("b", Data::Int(1)), ("c", Data::Int(2))],
        vec![
            ("a", Data::Int(9)), ("b", Data::Int(1)), ("c", Data::Int(2)),
        ],
    ] {
        let inst = defs.instantiate("T", &map(&entries)).unwrap();
        let original = inst.der();
        let decoded = unmarshal_der(&original).unwrap();
        let rebuilt = defs.instantiate(
            "T",
            &Data::Unm(Arc::new(Unmarshalled::Constructed(decoded)))
        ).unwrap();
        assert_eq!(rebuilt.der(), original);
    }
}

/// Decodes an optionally `0x`-prefixed hex string on the cook stack.
fn decode_hex(stack: &mut Vec<Data>, location: &str) -> Result<(), Error> {
    let text = match stack.pop() {
        Some(Data::Str(text)) => text,
        _ => {
            return Err(Error::Cook {
                path: location.into(),
                msg: "decode(hex) requires a string".into(),
            })
        }
    };
    let digits: String = text.split_whitespace().collect();
    let digits = digits.strip_prefix("0x").unwrap_or(digits.as_str());
    let nibbles: Option<Vec<u32>> =
        digits.chars().map(|c| c.to_digit(16)).collect();
    let nibbles = match nibbles {
        Some(nibbles) if nibbles.len() % 2 == 0 => nibbles,
        _ => {
            return Err(Error::Cook {
                path: location.into(),
                msg: format!(
                    "decode(hex): argument is not a proper hex \
                     string: {}",
                    text
                ),
            })
        }
    };
    let bytes: Vec<u8> = nibbles.chunks(2).map(|pair| {
        (pair[0] * 16 + pair[1]) as u8
    }).collect();
    stack.push(Data::Bytes(bytes.into()));
    Ok(())
}

#[test]
fn typed_json_reconstructs_the_certificate() {
    let defs = rfc5280();
    let cert = defs.instantiate(
        "Certificate", &certificate_data(&defs)
    ).unwrap();
    let original = cert.der();

    let json = cert.json(&JsonParams {
        with_types: true, ..Default::default()
    });
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

    let mut funcs = CookFunctions::new();
    funcs.insert("decode(hex)".into(), Arc::new(decode_hex));
    let cooked = cook(&defs, &[], &funcs, parsed.into()).unwrap();
    let rebuilt = defs.instantiate("Certificate", &cooked).unwrap();
    assert_eq!(rebuilt.der(), original);
}

#[test]
fn plain_json_is_readable() {
    let defs = rfc5280();
    let cert = defs.instantiate(
        "Certificate", &certificate_data(&defs)
    ).unwrap();
    let json = cert.json(&JsonParams::default());
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["tbsCertificate"]["version"], "v3");
    assert_eq!(
        parsed["tbsCertificate"]["signature"]["algorithm"],
        "1.2.840.113549.1.1.11"
    );
    assert_eq!(
        parsed["tbsCertificate"]["validity"]["notBefore"]["utcTime"],
        "230101000000Z"
    );
}
