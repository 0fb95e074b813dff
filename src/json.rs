//! Rendering instances as JSON.
//!
//! This is a private module. Its public items are re-exported by the parent.
//!
//! The plain rendering maps values to their natural JSON shapes. With
//! [`JsonParams::with_types`] set, every value is wrapped in a cook
//! program (`"$… Typename"`) so that parsing the output with a JSON
//! reader and running it through [`cook`][crate::cook] plus
//! [`instantiate`][crate::Definitions::instantiate] reconstructs the same
//! instance. Because JSON has no way to attach a type annotation to an
//! object itself, typed objects spill into auxiliary `_tempNNNNNN` sibling
//! keys that the wrapping program references by name.

use std::collections::HashMap;
use std::sync::Arc;
use crate::decode::Unmarshalled;
use crate::instantiate::Data;
use crate::node::{int_name, BasicType, Definitions, Instance, Value};

//------------ EmbeddedDer ---------------------------------------------------

/// A registration for expanding DER carried inside an OCTET STRING.
///
/// When the renderer encounters the named field inside the named type and
/// the most recently rendered OBJECT IDENTIFIER sibling equals `oid`, the
/// field's content is unmarshalled and rendered inline as `decode_as`
/// instead of as an opaque byte string. The emitted program re-encodes
/// the structure on re-parse, which requires the host to register an
/// `encode(DER)` cook function.
#[derive(Clone, Debug)]
pub struct EmbeddedDer {
    /// The declared type containing the field, e.g. `Extension`.
    pub typename: String,

    /// The field holding the embedded DER, e.g. `extnValue`.
    pub field: String,

    /// The sibling OBJECT IDENTIFIER selecting this decoder, in dotted
    /// form.
    pub oid: String,

    /// The type to decode the embedded DER as.
    pub decode_as: String,
}


//------------ JsonParams ----------------------------------------------------

/// Options for [`Instance::json`].
#[derive(Clone, Debug, Default)]
pub struct JsonParams<'a> {
    /// Wrap values in cook programs so the output re-parses without loss
    /// of type.
    pub with_types: bool,

    /// Always render INTEGER/ENUMERATED as numbers, never as value names.
    pub no_int_names: bool,

    /// Always render BIT STRING numerically, never as bit names.
    pub no_bit_names: bool,

    /// Aliases for known OBJECT IDENTIFIER values, keyed by dotted form.
    /// With types, the alias is emitted as a program referencing the
    /// definition of that name.
    pub oid_names: HashMap<String, String>,

    /// Embedded DER expansions; needs `defs` to be set.
    pub embedded: Vec<EmbeddedDer>,

    /// The definitions used to decode embedded DER.
    pub defs: Option<&'a Definitions>,
}

impl Instance {
    /// Renders the instance as JSON.
    pub fn json(&self, params: &JsonParams) -> String {
        let mut renderer = Renderer {
            params,
            indent: String::new(),
            spill: Vec::new(),
            temp_count: 0,
        };
        let mut out = String::new();
        renderer.instance(&mut out, self, params.with_types);
        if renderer.spill.is_empty() {
            out
        }
        else {
            // The top-level object spilled; its body alone is the
            // useful output, since the caller knows the top type.
            renderer.spill.remove(0).1
        }
    }
}


//------------ Renderer ------------------------------------------------------

struct Renderer<'a> {
    params: &'a JsonParams<'a>,
    indent: String,
    spill: Vec<(String, String)>,
    temp_count: u32,
}

/// The name used in type annotations: the declared name, or the basic
/// type with spaces replaced so it stays a single program word.
fn type_name(t: &Instance) -> String {
    if t.typename.is_empty() {
        t.basic.name().replace(' ', "_")
    }
    else {
        t.typename.clone()
    }
}

fn dotted(oid: &[u64]) -> String {
    oid.iter().map(u64::to_string).collect::<Vec<_>>().join(".")
}

impl<'a> Renderer<'a> {
    fn next_temp(&mut self) -> String {
        if self.temp_count == 0 {
            self.temp_count = 1_000_000;
        }
        self.temp_count -= 1;
        format!("_temp{:06}", self.temp_count)
    }

    fn instance(&mut self, out: &mut String, t: &Instance, with_type: bool) {
        let with_type_or_any = with_type || t.is_any;
        match t.basic {
            BasicType::Sequence | BasicType::Set | BasicType::Choice => {
                if with_type_or_any {
                    let tempvar = self.next_temp();
                    out.push_str(&format!(
                        "\"${} {}\"", tempvar, type_name(t)
                    ));
                    let mut body = String::new();
                    self.struct_body(&mut body, t, with_type);
                    self.spill.push((tempvar, body));
                }
                else {
                    self.struct_body(out, t, with_type);
                }
            }
            BasicType::SequenceOf | BasicType::SetOf => {
                if with_type_or_any {
                    let tempvar = self.next_temp();
                    out.push_str(&format!(
                        "\"${} {}\"", tempvar, type_name(t)
                    ));
                    let mut body = String::new();
                    self.list_body(&mut body, t, with_type);
                    self.spill.push((tempvar, body));
                }
                else {
                    self.list_body(out, t, with_type);
                }
            }
            BasicType::Null => out.push_str("null"),
            BasicType::OctetString | BasicType::Boolean
                | BasicType::ObjectIdentifier | BasicType::Integer
                | BasicType::Enumerated | BasicType::BitString
            => {
                self.value(out, t, with_type);
            }
            _ => panic!("unhandled case in json renderer"),
        }
    }

    fn struct_body(
        &mut self, out: &mut String, t: &Instance, with_type: bool
    ) {
        out.push_str("{\n");
        self.indent.push_str("  ");
        let mut last_oid: Option<String> = None;
        let mut first = true;
        for child in &t.children {
            if !first {
                out.push_str(",\n");
            }
            first = false;
            out.push_str(&self.indent);
            out.push_str(&format!("\"{}\": ", child.name));
            if !self.try_embedded(out, t, child, &last_oid) {
                self.instance(out, child, with_type);
            }
            if let Some(Value::Oid(oid)) = &child.value {
                last_oid = Some(dotted(oid));
            }
            for (name, body) in std::mem::take(&mut self.spill) {
                out.push_str(",\n");
                out.push_str(&self.indent);
                out.push_str(&format!("\"{}\": ", name));
                out.push_str(&body);
            }
        }
        let len = self.indent.len();
        self.indent.truncate(len - 2);
        out.push('\n');
        out.push_str(&self.indent);
        out.push('}');
    }

    fn list_body(
        &mut self, out: &mut String, t: &Instance, with_type: bool
    ) {
        out.push_str("[\n");
        self.indent.push_str("  ");
        let mut first = true;
        for child in &t.children {
            if !first {
                out.push_str(",\n");
            }
            first = false;
            out.push_str(&self.indent);
            self.instance(out, child, with_type);
        }
        let len = self.indent.len();
        self.indent.truncate(len - 2);
        out.push('\n');
        out.push_str(&self.indent);
        out.push(']');
    }

    /// Expands embedded DER if a matching registration exists.
    fn try_embedded(
        &mut self, out: &mut String, parent: &Instance, child: &Instance,
        last_oid: &Option<String>
    ) -> bool {
        // Work off the shared params reference so the registration can
        // stay borrowed while the renderer state changes.
        let params = self.params;
        let defs = match params.defs {
            Some(defs) => defs,
            None => return false,
        };
        let oid = match last_oid {
            Some(oid) => oid,
            None => return false,
        };
        let reg = match params.embedded.iter().find(|reg| {
            reg.typename == parent.typename
                && reg.field == child.name
                && reg.oid == *oid
        }) {
            Some(reg) => reg,
            None => return false,
        };
        let bytes = match &child.value {
            Some(Value::Bytes(bytes)) => bytes,
            _ => return false,
        };
        let cons = match crate::decode::unmarshal_der(bytes) {
            Ok(cons) => cons,
            Err(_) => return false,
        };
        let data = Data::Unm(Arc::new(Unmarshalled::Constructed(cons)));
        let inst = match defs.instantiate(&reg.decode_as, &data) {
            Ok(inst) => inst,
            Err(_) => return false,
        };

        let tempvar = self.next_temp();
        let mut body = String::new();
        self.render_plain(&mut body, &inst);
        out.push_str(&format!(
            "\"${} {} encode(DER) {}\"",
            tempvar, reg.decode_as, type_name(child)
        ));
        self.spill.push((tempvar, body));
        true
    }

    /// Renders a decoded structure without wrapping it in its own type
    /// program; the caller names the type in the re-encoding program.
    fn render_plain(&mut self, out: &mut String, t: &Instance) {
        match t.basic {
            BasicType::Sequence | BasicType::Set | BasicType::Choice => {
                self.struct_body(out, t, true)
            }
            BasicType::SequenceOf | BasicType::SetOf => {
                self.list_body(out, t, true)
            }
            _ => self.instance(out, t, true),
        }
    }

    fn value(&mut self, out: &mut String, t: &Instance, with_type: bool) {
        let with_type_or_any = with_type || t.is_any;
        let tn = type_name(t);
        let value = match &t.value {
            Some(value) => value,
            None => panic!("unhandled case in json renderer"),
        };
        match value {
            Value::Bool(value) => {
                if with_type_or_any && tn != "BOOLEAN" {
                    out.push_str(&format!("\"$'{}' {}\"", value, tn));
                }
                else {
                    out.push_str(&format!("{}", value));
                }
            }
            Value::Bytes(bytes) => {
                match std::str::from_utf8(bytes) {
                    Ok(text) => {
                        let enc = serde_json::to_string(text)
                            .expect("string encoding cannot fail");
                        if with_type_or_any {
                            let inner = &enc[1..enc.len() - 1];
                            out.push_str("\"$'");
                            out.push_str(&inner.replace('\'', "''"));
                            out.push_str(&format!("' {}\"", tn));
                        }
                        else {
                            out.push_str(&enc);
                        }
                    }
                    Err(_) => {
                        // Not valid UTF-8; fall back to hex via the
                        // decode(hex) cook function.
                        out.push_str("\"$'0x");
                        let mut space = "";
                        for byte in bytes.iter() {
                            out.push_str(
                                &format!("{}{:02X}", space, byte)
                            );
                            space = " ";
                        }
                        out.push_str("' decode(hex)");
                        if with_type_or_any {
                            out.push_str(&format!(" {}", tn));
                        }
                        out.push('"');
                    }
                }
            }
            Value::Big(value) => {
                out.push_str(&format!("\"${} {}\"", value, tn));
            }
            Value::Int(value) => {
                if !self.params.no_int_names {
                    if let Some(name) = int_name(&t.namedints, *value) {
                        out.push('"');
                        if with_type_or_any {
                            out.push_str(
                                &format!("$'{}' {}", name, tn)
                            );
                        }
                        else {
                            out.push_str(name);
                        }
                        out.push('"');
                        return
                    }
                }
                if with_type_or_any && tn != "INTEGER" {
                    out.push_str(&format!("\"${} {}\"", value, tn));
                }
                else {
                    out.push_str(&format!("{}", value));
                }
            }
            Value::Oid(oid) => {
                let text = dotted(oid);
                if let Some(alias) = self.params.oid_names.get(&text) {
                    if with_type_or_any {
                        out.push_str(&format!("\"${}\"", alias));
                    }
                    else {
                        out.push_str(&format!("\"{}\"", alias));
                    }
                    return
                }
                out.push('"');
                if with_type_or_any {
                    out.push('$');
                }
                out.push_str(&text);
                if with_type_or_any {
                    out.push_str(&format!(" {}", tn));
                }
                out.push('"');
            }
            Value::Bits(bits) => {
                out.push('"');
                if with_type_or_any {
                    out.push_str("$'");
                }
                self.render_bits(out, t, bits);
                if with_type_or_any {
                    out.push_str(&format!("' {}", tn));
                }
                out.push('"');
            }
            Value::Null => out.push_str("null"),
        }
    }

    /// Renders bits as names when every set bit has one and the length
    /// is implied by the last bit being set; otherwise as hex or binary.
    fn render_bits(&self, out: &mut String, t: &Instance, bits: &[bool]) {
        let mut have_all = bits.last().copied().unwrap_or(false)
            && !self.params.no_bit_names
            && !t.typename.is_empty();

        let mut names = Vec::new();
        if have_all {
            for (name, &bitno) in t.namedints.iter() {
                if bitno >= 0
                    && (bitno as usize) < bits.len()
                    && bits[bitno as usize]
                {
                    names.push((bitno, name.as_str()));
                }
            }
            names.sort();
            for (idx, &set) in bits.iter().enumerate() {
                if set && int_name(&t.namedints, idx as i64).is_none() {
                    have_all = false;
                    break
                }
            }
        }

        if have_all {
            let mut comma = "";
            for (_, name) in names {
                out.push_str(comma);
                out.push_str(name);
                comma = ", ";
            }
        }
        else if bits.len() > 16 && bits.len() % 4 == 0 {
            out.push_str("0x");
            let mut digit = 0;
            for chunk in bits.chunks(4) {
                let mut value = 0u8;
                for &bit in chunk {
                    value <<= 1;
                    if bit {
                        value |= 1;
                    }
                }
                out.push_str(&format!("{:X}", value));
                digit += 1;
                if digit % 2 == 0 && digit * 4 < bits.len() {
                    out.push(' ');
                }
            }
        }
        else {
            if !bits.is_empty() {
                out.push_str("0b");
            }
            for &bit in bits {
                out.push(if bit { '1' } else { '0' });
            }
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::cook::{cook, CookFunctions};
    use crate::error::Error;

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
    fn plain_rendering() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             Version ::= INTEGER { v1(0), v2(1), v3(2) } \
             T ::= SEQUENCE { \
               version Version, \
               serial INTEGER, \
               issuer UTF8String, \
               oid OBJECT IDENTIFIER, \
               ok BOOLEAN \
             } END"
        );
        let inst = defs.instantiate("T", &map(&[
            ("version", Data::Int(2)),
            ("serial", Data::Int(17)),
            ("issuer", Data::Str("Test CA".into())),
            ("oid", Data::Str("1.2.3".into())),
            ("ok", Data::Bool(true)),
        ])).unwrap();
        let json = inst.json(&JsonParams::default());
        let parsed: serde_json::Value =
            serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["version"], "v3");
        assert_eq!(parsed["serial"], 17);
        assert_eq!(parsed["issuer"], "Test CA");
        assert_eq!(parsed["oid"], "1.2.3");
        assert_eq!(parsed["ok"], true);
    }

    #[test]
    fn typed_output_reinstantiates() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             Version ::= INTEGER { v1(0), v2(1), v3(2) } \
             T ::= SEQUENCE { \
               version Version, \
               name PrintableString, \
               data OCTET STRING, \
               bits BIT STRING \
             } END"
        );
        let inst = defs.instantiate("T", &map(&[
            ("version", Data::Int(2)),
            ("name", Data::Str("abc".into())),
            ("data", Data::Bytes(vec![0x01, 0xff, 0x02].into())),
            ("bits", Data::Str("0b1011".into())),
        ])).unwrap();
        let original = inst.der();

        let json = inst.json(&JsonParams {
            with_types: true, ..Default::default()
        });
        let parsed: serde_json::Value =
            serde_json::from_str(&json).unwrap();

        // Re-parse through cook; decode(hex) is needed for the binary
        // octet string.
        let mut funcs = CookFunctions::new();
        funcs.insert("decode(hex)".into(), Arc::new(
            |stack: &mut Vec<Data>, location: &str| {
                let top = match stack.pop() {
                    Some(Data::Str(text)) => text,
                    _ => {
                        return Err(Error::cook(
                            location.trim_end_matches(": "),
                            "decode(hex) requires a string"
                        ))
                    }
                };
                let digits: String = top.split_whitespace().collect();
                let digits = digits.trim_start_matches("0x");
                let mut bytes = Vec::new();
                let chars: Vec<char> = digits.chars().collect();
                for pair in chars.chunks(2) {
                    let hi = pair[0].to_digit(16).unwrap();
                    let lo = pair[1].to_digit(16).unwrap();
                    bytes.push((hi * 16 + lo) as u8);
                }
                stack.push(Data::Bytes(bytes.into()));
                Ok(())
            }
        ));
        let cooked = cook(&defs, &[], &funcs, parsed.into()).unwrap();
        let rebuilt = defs.instantiate("T", &cooked).unwrap();
        assert_eq!(rebuilt.der(), original);
    }

    #[test]
    fn bit_names_render_when_complete() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             KeyUsage ::= BIT STRING { digitalSignature(0), \
             nonRepudiation(1), keyEncipherment(2) } END"
        );
        let inst = defs.instantiate(
            "KeyUsage",
            &Data::Str("digitalSignature keyEncipherment".into())
        ).unwrap();
        let json = inst.json(&JsonParams::default());
        assert_eq!(json, "\"digitalSignature, keyEncipherment\"");

        // An unnamed trailing zero bit forces the numeric form.
        let inst = defs.instantiate(
            "KeyUsage", &Data::Str("0b101000".into())
        ).unwrap();
        let json = inst.json(&JsonParams::default());
        assert_eq!(json, "\"0b101000\"");
    }

    #[test]
    fn oid_alias() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             id-ce-keyUsage OBJECT IDENTIFIER ::= { 2 5 29 15 } END"
        );
        let inst = defs.value("id-ce-keyUsage").unwrap();
        let mut params = JsonParams::default();
        params.oid_names.insert(
            "2.5.29.15".into(), "id-ce-keyUsage".into()
        );
        assert_eq!(inst.json(&params), "\"id-ce-keyUsage\"");
        params.with_types = true;
        assert_eq!(inst.json(&params), "\"$id-ce-keyUsage\"");
    }

    #[test]
    fn embedded_der_expansion() {
        let src =
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             BasicConstraints ::= SEQUENCE { \
               cA BOOLEAN DEFAULT FALSE, \
               pathLenConstraint INTEGER OPTIONAL \
             } \
             Extension ::= SEQUENCE { \
               extnId OBJECT IDENTIFIER, \
               extnValue OCTET STRING \
             } END";
        let defs = defs(src);
        let bc = defs.instantiate("BasicConstraints", &map(&[
            ("cA", Data::Bool(true)),
        ])).unwrap();
        let ext = defs.instantiate("Extension", &map(&[
            ("extnId", Data::Str("2.5.29.19".into())),
            ("extnValue", Data::Bytes(bc.der().into())),
        ])).unwrap();

        let params = JsonParams {
            with_types: true,
            embedded: vec![EmbeddedDer {
                typename: "Extension".into(),
                field: "extnValue".into(),
                oid: "2.5.29.19".into(),
                decode_as: "BasicConstraints".into(),
            }],
            defs: Some(&defs),
            ..Default::default()
        };
        let json = ext.json(&params);
        let parsed: serde_json::Value =
            serde_json::from_str(&json).unwrap();
        // The extnValue is replaced by a re-encoding program plus a
        // spilled sibling holding the decoded structure.
        let text = parsed["extnValue"].as_str().unwrap();
        assert!(text.contains("BasicConstraints encode(DER)"));
        assert!(text.starts_with("$_temp"));
        let spilled = text.split_whitespace().next().unwrap()
            .trim_start_matches('$');
        assert!(parsed.get(spilled).is_some());
    }
}
