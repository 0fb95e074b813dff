//! Textual rendering of definitions and instances.
//!
//! This is a private module providing the `Display` impls.
//!
//! `Definitions` renders back into ASN.1 module text, which is mainly
//! useful for checking what the parser and resolver made of a module.
//! `Instance` renders into a compact single-line form like
//! `SEQUENCE { a: 5, b: TRUE }`.

use std::fmt;
use crate::node::{
    int_name, BasicType, Definitions, Instance, NamedInts, NodeId, Role,
    Slot, Value,
};
use crate::tag::class_name;


//--- Definitions

impl fmt::Display for Definitions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.implicit {
            f.write_str("DEFINITIONS IMPLICIT TAGS ::=\n\nBEGIN\n\n")?;
        }
        else {
            f.write_str("DEFINITIONS EXPLICIT TAGS ::=\n\nBEGIN\n\n")?;
        }
        for &id in &self.order {
            let node = self.node(id);
            if node.role == Role::TypeDef {
                write!(f, "{} ::= ", node.name)?;
                self.fmt_type(f, id, "")?;
            }
            else {
                let typename = if node.typename.is_empty() {
                    node.basic.name()
                }
                else {
                    &node.typename
                };
                write!(f, "{} {} ::= ", node.name, typename)?;
                fmt_slot(f, &node.value, &node.namedints)?;
            }
            f.write_str("\n\n")?;
        }
        f.write_str("\nEND\n")
    }
}

impl Definitions {
    fn fmt_type(
        &self, f: &mut fmt::Formatter, id: NodeId, indent: &str
    ) -> fmt::Result {
        let node = self.node(id);
        if let Some(tag) = node.source_tag {
            write!(f, "[{}{}]", class_name(tag.class()), tag.number())?;
            if node.implicit {
                f.write_str(" IMPLICIT ")?;
            }
            else {
                f.write_str(" EXPLICIT ")?;
            }
        }

        if !node.typename.is_empty() {
            f.write_str(&node.typename)?;
        }
        else {
            f.write_str(node.basic.name())?;
            match node.basic {
                BasicType::SequenceOf | BasicType::SetOf => {
                    f.write_str(" ")?;
                    self.fmt_type(f, node.children[0], indent)?;
                }
                BasicType::Sequence | BasicType::Set
                    | BasicType::Choice
                => {
                    f.write_str(" ")?;
                    self.fmt_structure(f, id, indent)?;
                }
                _ => {
                    if !node.namedints.is_empty() {
                        f.write_str(" ")?;
                        fmt_labelled_ints(f, &node.namedints, indent)?;
                    }
                }
            }
        }

        if node.optional {
            if !matches!(node.value, Slot::None) {
                f.write_str(" DEFAULT ")?;
                fmt_slot(f, &node.value, &node.namedints)?;
            }
            else {
                f.write_str(" OPTIONAL")?;
            }
        }
        Ok(())
    }

    fn fmt_structure(
        &self, f: &mut fmt::Formatter, id: NodeId, indent: &str
    ) -> fmt::Result {
        f.write_str("{\n")?;
        let children = &self.node(id).children;
        let deeper = format!("{}    ", indent);
        for (idx, &child) in children.iter().enumerate() {
            f.write_str(&deeper)?;
            f.write_str(&self.node(child).name)?;
            f.write_str(" ")?;
            self.fmt_type(f, child, &deeper)?;
            if idx < children.len() - 1 {
                f.write_str(",")?;
            }
            f.write_str("\n")?;
        }
        f.write_str(indent)?;
        f.write_str("}")
    }
}

fn fmt_labelled_ints(
    f: &mut fmt::Formatter, ints: &NamedInts, indent: &str
) -> fmt::Result {
    f.write_str("{\n")?;
    let mut entries: Vec<(i64, &str)> =
        ints.iter().map(|(name, &value)| (value, name.as_str())).collect();
    entries.sort();
    for (idx, (value, name)) in entries.iter().enumerate() {
        write!(f, "{}    {} ({})", indent, name, value)?;
        if idx < entries.len() - 1 {
            f.write_str(",")?;
        }
        f.write_str("\n")?;
    }
    f.write_str(indent)?;
    f.write_str("}")
}

fn fmt_slot(
    f: &mut fmt::Formatter, slot: &Slot, ints: &NamedInts
) -> fmt::Result {
    match slot {
        Slot::Done(value) => fmt_value(f, value, ints),
        Slot::Raw(raw) => f.write_str(raw),
        _ => f.write_str("?"),
    }
}

fn fmt_value(
    f: &mut fmt::Formatter, value: &Value, ints: &NamedInts
) -> fmt::Result {
    match value {
        Value::Bool(true) => f.write_str("TRUE"),
        Value::Bool(false) => f.write_str("FALSE"),
        Value::Null => f.write_str("NULL"),
        Value::Bytes(bytes) => f.write_str(&quote_bytes(bytes)),
        Value::Int(value) => {
            match int_name(ints, *value) {
                Some(name) => f.write_str(name),
                None => write!(f, "{}", value),
            }
        }
        Value::Big(value) => write!(f, "{}", value),
        Value::Oid(oid) => {
            f.write_str("{")?;
            for component in oid {
                write!(f, " {}", component)?;
            }
            f.write_str(" }")
        }
        Value::Bits(bits) => fmt_bits(f, bits, ints),
    }
}

/// Renders a bit string as `(name, …, 0xHH HH, 0b…)`.
///
/// Named set bits come first. If any set bit is unnamed, whole octets
/// follow as hex for longer strings and the remaining bits as binary.
fn fmt_bits(
    f: &mut fmt::Formatter, bits: &[bool], ints: &NamedInts
) -> fmt::Result {
    f.write_str("(")?;
    let mut comma = false;

    let mut entries: Vec<(i64, &str)> =
        ints.iter().map(|(name, &value)| (value, name.as_str())).collect();
    entries.sort();
    for (value, name) in &entries {
        let idx = *value as usize;
        if *value >= 0 && idx < bits.len() && bits[idx] {
            if comma {
                f.write_str(", ")?;
            }
            comma = true;
            f.write_str(name)?;
        }
    }

    let have_all = bits.iter().enumerate().all(|(idx, &set)| {
        !set || int_name(ints, idx as i64).is_some()
    });

    if !have_all {
        let mut ofs = 0;
        if bits.len() > 16 {
            if comma {
                f.write_str(", ")?;
            }
            comma = true;
            f.write_str("0x")?;
            let mut space = false;
            while ofs + 8 <= bits.len() {
                let mut octet = 0u8;
                for &bit in &bits[ofs..ofs + 8] {
                    octet <<= 1;
                    if bit {
                        octet |= 1;
                    }
                }
                if space {
                    f.write_str(" ")?;
                }
                space = true;
                write!(f, "{:02X}", octet)?;
                ofs += 8;
            }
        }
        if ofs < bits.len() {
            if comma {
                f.write_str(", ")?;
            }
            f.write_str("0b")?;
            for &bit in &bits[ofs..] {
                f.write_str(if bit { "1" } else { "0" })?;
            }
        }
    }
    f.write_str(")")
}

/// Quotes bytes the way a string literal would be written, with `\xNN`
/// escapes for anything unprintable.
fn quote_bytes(bytes: &[u8]) -> String {
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
            _ => out.push_str(&format!("\\x{:02x}", byte)),
        }
    }
    out.push('"');
    out
}


//--- Instance

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.basic {
            BasicType::Choice => fmt::Display::fmt(&self.children[0], f),
            BasicType::Sequence | BasicType::Set => {
                f.write_str(self.basic.name())?;
                f.write_str(" { ")?;
                for (idx, child) in self.children.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", child.name, child)?;
                }
                f.write_str(" }")
            }
            BasicType::SequenceOf | BasicType::SetOf => {
                if self.basic == BasicType::SequenceOf {
                    f.write_str("SEQUENCE [")?;
                }
                else {
                    f.write_str("SET [")?;
                }
                for (idx, child) in self.children.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    fmt::Display::fmt(child, f)?;
                }
                f.write_str("]")
            }
            BasicType::Null => f.write_str("NULL"),
            _ => {
                match &self.value {
                    Some(value) => fmt_value(f, value, &self.namedints),
                    None => f.write_str("?"),
                }
            }
        }
    }
}


//============ Tests =========================================================
