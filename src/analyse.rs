//! Human-readable analysis of DER encoded bytes.
//!
//! This is a private module. Its public items are re-exported by the parent.
//!
//! Unlike [`unmarshal_der`][crate::unmarshal_der], which gates what the
//! instantiator accepts, the analyser is a diagnostic tool: it walks
//! whatever it is given as far as possible, flags problems inline with
//! `!…!` markers, and guesses at the meaning of primitive contents
//! (integers, strings, object identifiers, nested DER).

use num_bigint::BigInt;
use crate::instantiate::decode_oid_content;
use crate::tag::universal_name;

const INDENT_STEP: &str = "  ";
const PREMATURE_END: &str = " !PREMATURE END OF DATA!";

/// Produces a pretty-printed analysis of a DER encoding.
pub fn analyse_der(der: &[u8]) -> String {
    let mut output = String::new();
    let used = analyse(der, 0, "", &mut output);
    if used < der.len() {
        output.push_str(&format!(
            "\n{} UNDECODED BYTES REMAINING!", der.len() - used
        ));
    }
    output
}

/// Analyses `der` starting at `idx`; returns the index of the next
/// undecoded byte.
fn analyse(
    der: &[u8], mut idx: usize, indent: &str, output: &mut String
) -> usize {
    while idx < der.len() {
        output.push_str(indent);
        let tag = der[idx];
        output.push_str(&format!("{:02X}", tag));
        let class = tag & 0xc0;
        let constructed = tag & 0x20 != 0;
        let mut tagnum = (tag & 0x1f) as u32;
        if tagnum == 31 {
            tagnum = 0;
            loop {
                idx += 1;
                if idx == der.len() {
                    output.push_str(PREMATURE_END);
                    return idx
                }
                output.push_str(&format!(" {:02X}", der[idx]));
                tagnum = (tagnum << 7) + (der[idx] & 0x7f) as u32;
                if der[idx] & 0x80 == 0 {
                    break
                }
                if tagnum > 0xffffff {
                    output.push_str(" !TAG OUT OF RANGE!");
                    return idx
                }
            }
        }

        let classstr = match class {
            0x00 => "UNIVERSAL ",
            0x40 => "APPLICATION ",
            0xc0 => "PRIVATE ",
            _ => "CONTEXT-SPECIFIC ",
        };
        output.push_str(&format!(" {}{}", classstr, tagnum));
        if class == 0 && tagnum > 0 && tagnum < 31 {
            if let Some(name) = universal_name(tagnum as u8) {
                output.push_str(&format!(" ({})", name));
            }
        }
        output.push_str(
            if constructed { " CONSTRUCTED" } else { " PRIMITIVE" }
        );
        output.push('\n');

        idx += 1;
        if idx == der.len() {
            output.push_str(PREMATURE_END);
            return idx
        }

        output.push_str(&format!("{}{:02X}", indent, der[idx]));
        let mut length = der[idx] as isize;
        if length > 127 {
            length &= 127;
            if length == 0 {
                // Indefinite length.
                length = -1;
                if !constructed {
                    output.push_str(
                        " !PRIMITIVE ENCODING WITH INDEFINITE LENGTH!"
                    );
                    return idx
                }
                output.push_str(" INDEFINITE LENGTH");
            }
            else {
                if length > 3 {
                    // Structures over 16 MiB or a garbage length.
                    output.push_str(" !TOO MANY LENGTH OCTETS!");
                    return idx
                }
                let mut value = 0isize;
                while length > 0 {
                    idx += 1;
                    if idx == der.len() {
                        output.push_str(PREMATURE_END);
                        return idx
                    }
                    output.push_str(&format!(" {:02X}", der[idx]));
                    value = (value << 8) + der[idx] as isize;
                    length -= 1;
                }
                length = value;
                output.push_str(&format!(" LENGTH {}", length));
            }
        }
        else {
            output.push_str(&format!(" LENGTH {}", length));
        }

        if tag == 0 && length == 0 {
            // End-of-contents marker.
            return idx + 1
        }

        output.push('\n');

        if constructed {
            idx += 1;
            if length < 0 {
                idx = analyse(der, idx, &format!("{}{}", indent, INDENT_STEP), output);
            }
            else if idx + length as usize > der.len() {
                output.push_str(" !LENGTH EXCEEDS AVAILABLE DATA!");
            }
            else {
                let end = idx + length as usize;
                let idx2 = analyse(
                    &der[..end], idx,
                    &format!("{}{}", indent, INDENT_STEP), output
                );
                if idx2 != end {
                    output.push_str(" !SHORT DATA!");
                }
                idx = idx2;
            }
            if output.ends_with('!') {
                return idx
            }
        }
        else {
            let mut length = length as usize;
            output.push_str(indent);
            if length == 0 {
                output.push_str("EMPTY ");
            }

            let mut contents = String::new();
            let mut already_decoded = false;
            let mut decoding = String::new();
            if length > 0
                && idx + length < der.len()
                && (class == 0x80
                    || matches!(tag, 19 | 4 | 6 | 12 | 23 | 2))
            {
                let cont = &der[idx + 1..idx + 1 + length];
                if tag == 2 {
                    contents = format!(
                        " {}", BigInt::from_signed_bytes_be(cont)
                    );
                }
                if contents.is_empty() && (tag == 4 || tag > 31) {
                    // The contents may themselves be DER.
                    let idx2 = analyse(
                        cont, 0,
                        &format!("{}{}", indent, INDENT_STEP),
                        &mut decoding
                    );
                    if idx2 == cont.len()
                        && !decoding.is_empty()
                        && !decoding.ends_with('!')
                    {
                        contents = " ARE VALID DER => DECODING\n".into();
                        already_decoded = true;
                        idx += cont.len();
                        length -= cont.len();
                    }
                }
                if contents.is_empty() && tag != 6 && length < 80 {
                    if let Some(quoted) = quote_bytes(cont) {
                        contents = format!(" {}", quoted);
                    }
                }
                if contents.is_empty()
                    && (tag == 6 || (4..16).contains(&length))
                {
                    let text = oid_string(cont);
                    if !text.ends_with('!') {
                        contents = format!(" {}", text);
                    }
                }
            }

            while !already_decoded && length > 0 {
                idx += 1;
                if idx == der.len() {
                    output.push_str(PREMATURE_END);
                    return idx
                }
                output.push_str(&format!("{:02X} ", der[idx]));
                length -= 1;
            }

            output.push_str("CONTENTS");
            if !contents.is_empty() {
                output.push_str(&contents);
            }
            if already_decoded {
                output.push_str(&decoding);
            }
            else {
                output.push('\n');
            }
            idx += 1;
        }
    }

    idx
}

/// Quotes content bytes as a printable string, or `None` if they are
/// binary.
fn quote_bytes(bytes: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &byte in bytes {
        match byte {
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(byte as char),
            _ => return None
        }
    }
    out.push('"');
    Some(out)
}

/// Renders OBJECT IDENTIFIER contents as a dotted string.
///
/// Errors are flagged with a trailing `!`, which callers use to discard
/// the guess.
fn oid_string(oid: &[u8]) -> String {
    if oid.is_empty() {
        return "!EMPTY OBJECT IDENTIFIER!".into()
    }
    match decode_oid_content(oid) {
        Some(components) => {
            components.iter().map(u64::to_string)
                .collect::<Vec<_>>().join(".")
        }
        None => "!ERROR DECODING OBJECT IDENTIFIER!".into()
    }
}


//============ Tests =========================================================
