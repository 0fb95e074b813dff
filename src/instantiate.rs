//! Creating typed instances from generic data.
//!
//! This is a private module. Its public items are re-exported by the parent.
//!
//! [`Definitions::instantiate`][crate::Definitions::instantiate] projects a
//! [`Data`] tree onto a schema type. Every basic type accepts a number of
//! input shapes, from native values over strings to unmarshalled DER; see
//! the table on [`Data`]. Errors carry the path of the offending element,
//! such as `/tbsCertificate/validity/notAfter`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use bytes::Bytes;
use num_bigint::BigInt;
use crate::decode::{Unmarshalled, UnmarshalledConstructed};
use crate::error::Error;
use crate::node::{
    BasicType, Definitions, Instance, NamedInts, NodeId, Value,
};
use crate::tag::{self, Tag, TagSeq};


//------------ Data ----------------------------------------------------------

/// A language-neutral data tree used as instantiation input.
///
/// The accepted shapes per basic type:
///
/// | Target | Accepted inputs |
/// |---|---|
/// | SEQUENCE/SET | `Map` of field name to data, unmarshalled constructed, compatible `Inst` |
/// | CHOICE | like SEQUENCE but exactly one key; unmarshalled data selects the alternative by tag |
/// | SEQUENCE OF / SET OF | `List`, unmarshalled constructed, `Inst` |
/// | OCTET STRING | `Str`, `Bytes`, list of integers 0..255, unmarshalled primitive |
/// | BOOLEAN | `Bool`, `"true"`/`"false"` (case-insensitive), unmarshalled primitive |
/// | NULL | `Null`, `"null"` (case-insensitive), empty unmarshalled primitive |
/// | INTEGER | `Int`, `Big`, integral `Float`, decimal string, named-int name, unmarshalled primitive |
/// | ENUMERATED | as INTEGER, but the value must be in the named-int table |
/// | OBJECT IDENTIFIER | `Ints`, list of integers, dotted string, unmarshalled primitive |
/// | BIT STRING | `Bools`, `Bytes`, `"0b…"`, `"0x…"`, bit names, unmarshalled primitive |
/// | ANY | the basic type is chosen from the shape of the input |
///
/// All types additionally accept an [`Instance`] of the same basic type;
/// for SEQUENCE/SET/CHOICE the declared type names must match and be
/// non-empty.
///
/// `From<serde_json::Value>` produces the subset `Null`/`Bool`/`Int`/
/// `Big`/`Float`/`Str`/`List`/`Map`, which is how JSON input enters the
/// pipeline.
#[derive(Clone, Debug)]
pub enum Data {
    Null,
    Bool(bool),
    Int(i64),
    Big(BigInt),
    Float(f64),
    Str(String),
    Bytes(Bytes),

    /// A list of integers, used for OBJECT IDENTIFIER components.
    Ints(Vec<i64>),

    /// A list of bits for BIT STRING.
    Bools(Vec<bool>),

    List(Vec<Data>),
    Map(BTreeMap<String, Data>),

    /// An already instantiated value.
    Inst(Instance),

    /// Unmarshalled DER produced by [`unmarshal_der`][crate::unmarshal_der].
    Unm(Arc<Unmarshalled>),
}

impl Data {
    /// A short name of the shape for error messages.
    fn shape(&self) -> &'static str {
        match self {
            Data::Null => "null",
            Data::Bool(_) => "boolean",
            Data::Int(_) | Data::Big(_) => "integer",
            Data::Float(_) => "number",
            Data::Str(_) => "string",
            Data::Bytes(_) => "byte string",
            Data::Ints(_) => "integer list",
            Data::Bools(_) => "bit list",
            Data::List(_) => "list",
            Data::Map(_) => "map",
            Data::Inst(_) => "instance",
            Data::Unm(_) => "unmarshalled data",
        }
    }

    /// Returns the elements of a list if every element is a small integer.
    fn as_int_list(&self) -> Option<Vec<i64>> {
        match self {
            Data::Ints(ints) => Some(ints.clone()),
            Data::List(items) => {
                items.iter().map(|item| match item {
                    Data::Int(int) => Some(*int),
                    _ => None
                }).collect()
            }
            _ => None
        }
    }

    /// Returns the elements of a list if every element is a boolean.
    fn as_bool_list(&self) -> Option<Vec<bool>> {
        match self {
            Data::Bools(bits) => Some(bits.clone()),
            Data::List(items) => {
                items.iter().map(|item| match item {
                    Data::Bool(bit) => Some(*bit),
                    _ => None
                }).collect()
            }
            _ => None
        }
    }
}

impl From<serde_json::Value> for Data {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value::*;

        match value {
            Null => Data::Null,
            Bool(inner) => Data::Bool(inner),
            Number(number) => {
                if let Some(int) = number.as_i64() {
                    Data::Int(int)
                }
                else if let Some(int) = number.as_u64() {
                    Data::Big(int.into())
                }
                else {
                    Data::Float(number.as_f64().unwrap_or(f64::NAN))
                }
            }
            String(inner) => Data::Str(inner),
            Array(items) => {
                Data::List(items.into_iter().map(Into::into).collect())
            }
            Object(map) => {
                Data::Map(
                    map.into_iter().map(|(k, v)| (k, v.into())).collect()
                )
            }
        }
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::Str(value.into())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::Str(value)
    }
}

impl From<i64> for Data {
    fn from(value: i64) -> Self {
        Data::Int(value)
    }
}

impl From<bool> for Data {
    fn from(value: bool) -> Self {
        Data::Bool(value)
    }
}

impl From<Instance> for Data {
    fn from(value: Instance) -> Self {
        Data::Inst(value)
    }
}


//------------ Path ----------------------------------------------------------

/// The location of an element within the instantiated structure.
pub(crate) struct Path<'a> {
    parent: Option<&'a Path<'a>>,
    name: String,
}

impl<'a> Path<'a> {
    pub fn root() -> Self {
        Path { parent: None, name: String::new() }
    }

    fn field(&'a self, name: &str) -> Path<'a> {
        Path { parent: Some(self), name: format!("/{}", name) }
    }

    fn index(&'a self, idx: usize) -> Path<'a> {
        Path { parent: Some(self), name: format!("[{}]", idx) }
    }
}

impl fmt::Display for Path<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(parent) = self.parent {
            parent.fmt(f)?;
        }
        f.write_str(&self.name)
    }
}


//------------ Schema view ---------------------------------------------------

/// The slice of schema information needed to instantiate one node.
#[derive(Clone)]
struct Proto {
    tags: TagSeq,
    name: String,
    typename: String,
    basic: BasicType,
    default: Option<Value>,
    optional: bool,
    children: Vec<NodeId>,
    namedints: Arc<NamedInts>,
}

fn proto_of(defs: &Definitions, id: NodeId) -> Proto {
    let node = defs.node(id);
    Proto {
        tags: node.tags.clone(),
        name: node.name.clone(),
        typename: node.typename.clone(),
        basic: node.basic,
        default: node.value.done().cloned(),
        optional: node.optional,
        children: node.children.clone(),
        namedints: node.namedints.clone(),
    }
}

fn new_instance(proto: &Proto) -> Instance {
    Instance {
        tags: proto.tags.clone(),
        name: proto.name.clone(),
        typename: proto.typename.clone(),
        basic: proto.basic,
        value: None,
        children: Vec::new(),
        namedints: proto.namedints.clone(),
        is_default: false,
        is_any: false,
    }
}

/// Creates a field instance carrying its DEFAULT value.
fn default_instance(proto: &Proto, value: Value) -> Instance {
    let mut inst = new_instance(proto);
    inst.value = Some(value);
    inst.is_default = true;
    inst
}

fn matches_default(proto: &Proto, inst: &Instance) -> bool {
    match (&proto.default, &inst.value) {
        (Some(default), Some(value)) => default.equals(value),
        _ => false
    }
}

fn type_error(path: &Path, asn1type: &str, data: &Data) -> Error {
    Error::instantiate(path.to_string(), format!(
        "Attempt to instantiate ASN.1 type {} from incompatible \
         input of shape {}",
        asn1type, data.shape()
    ))
}


//------------ Entry point ---------------------------------------------------

pub(crate) fn instantiate(
    defs: &Definitions, typename: &str, data: &Data
) -> Result<Instance, Error> {
    let id = match defs.typedefs.get(typename) {
        Some(&id) => id,
        None => {
            return Err(Error::undefined(
                format!("Type '{}' is undefined", typename)
            ))
        }
    };
    let node = defs.node(id);
    // The definition node keeps the defined name in `name`; the instance
    // carries it as its declared type.
    let proto = Proto {
        tags: node.tags.clone(),
        name: String::new(),
        typename: node.name.clone(),
        basic: node.basic,
        default: None,
        optional: false,
        children: node.children.clone(),
        namedints: node.namedints.clone(),
    };
    inst_proto(defs, &proto, data, &Path::root())
}

fn inst_proto(
    defs: &Definitions, proto: &Proto, data: &Data, path: &Path
) -> Result<Instance, Error> {
    // Unmarshalled input may still be wrapped in the synthetic root or in
    // EXPLICIT tag layers; unwrap down to the layer this type consumes.
    let adapted;
    let data = match data {
        Data::Unm(unm) => {
            adapted = Data::Unm(
                adapt_unmarshalled(&proto.tags, unm.clone(), path)?
            );
            &adapted
        }
        _ => data,
    };

    if let Data::Inst(other) = data {
        if proto.basic != BasicType::Any && other.basic != proto.basic {
            return Err(Error::instantiate(path.to_string(), format!(
                "Attempt to instantiate type {} from instance of type {}",
                proto.basic.name(), other.basic.name()
            )))
        }
    }

    match proto.basic {
        BasicType::Sequence | BasicType::Set => {
            inst_struct(defs, proto, data, false, path)
        }
        BasicType::Choice => inst_choice(defs, proto, data, path),
        BasicType::SequenceOf | BasicType::SetOf => {
            inst_seq_of(defs, proto, proto.children[0], data, path)
        }
        BasicType::OctetString => inst_octet_string(proto, data, path),
        BasicType::Boolean => inst_boolean(proto, data, path),
        BasicType::Null => inst_null(proto, data, path),
        BasicType::Integer => inst_integer(proto, data, path),
        BasicType::Enumerated => inst_enumerated(proto, data, path),
        BasicType::ObjectIdentifier => inst_oid(proto, data, path),
        BasicType::BitString => inst_bit_string(proto, data, path),
        BasicType::Any => inst_any(defs, proto, data, path),
        BasicType::Unknown => Err(Error::instantiate(
            path.to_string(), "Unhandled case in instantiate"
        )),
    }
}


//------------ Unmarshalled plumbing -----------------------------------------

/// Unwraps unmarshalled data down to the layer a type consumes.
///
/// The synthetic root of [`unmarshal_der`][crate::unmarshal_der] is
/// entered by selecting the element matching the type's first tag (or the
/// first element for tagless `CHOICE`/`ANY`). EXPLICIT wrappers produce
/// several tags in the sequence; one constructed layer is entered per
/// inner tag so that the innermost data reaches the recursive call.
fn adapt_unmarshalled(
    tags: &[u8], mut unm: Arc<Unmarshalled>, path: &Path
) -> Result<Arc<Unmarshalled>, Error> {
    let mut iter = tag::iter_tags(tags);
    let first = iter.next();

    if let Unmarshalled::Constructed(cons) = unm.as_ref() {
        if cons.tag.is_none() {
            let wanted = first.and_then(|t| {
                if t.len() == 1 { Some(t[0]) } else { None }
            });
            unm = match cons.member(wanted) {
                Some(member) => member,
                None => {
                    return Err(Error::instantiate(
                        path.to_string(),
                        match first {
                            Some(t) => format!(
                                "Unmarshalled data has no element with \
                                 tag 0x{:02X}",
                                t[0]
                            ),
                            None => {
                                "Unmarshalled data is empty".into()
                            }
                        }
                    ))
                }
            };
        }
    }

    for inner in iter {
        let cons = match unm.as_constructed() {
            Some(cons) => cons,
            None => {
                return Err(Error::instantiate(
                    path.to_string(),
                    "Explicitly tagged value is not constructed"
                ))
            }
        };
        let wanted = if inner.len() == 1 { Some(inner[0]) } else { None };
        unm = match cons.member(wanted) {
            Some(member) => member,
            None => {
                return Err(Error::instantiate(
                    path.to_string(),
                    "Explicitly tagged value is missing its inner value"
                ))
            }
        };
    }
    Ok(unm)
}

/// Returns whether `needle` appears in `hay` in order.
fn is_subsequence(needle: &[&[u8]], hay: &[&[u8]]) -> bool {
    let mut iter = hay.iter();
    needle.iter().all(|want| iter.any(|have| have == want))
}


//------------ Structures ----------------------------------------------------

fn inst_struct(
    defs: &Definitions, proto: &Proto, data: &Data, choice: bool,
    path: &Path
) -> Result<Instance, Error> {
    let mut inst = new_instance(proto);
    match data {
        Data::Inst(other) => {
            if proto.typename.is_empty()
                || proto.typename != other.typename
            {
                return Err(Error::instantiate(path.to_string(), format!(
                    "Cannot instantiate complex type named \"{}\" from \
                     complex type named \"{}\". Both types must have the \
                     same name and that name must be non-empty.",
                    proto.typename, other.typename
                )))
            }
            inst.children = other.children.clone();
            Ok(inst)
        }
        Data::Map(map) => {
            for &cid in &proto.children {
                let child_proto = proto_of(defs, cid);
                let child_path = path.field(&child_proto.name);
                match map.get(&child_proto.name) {
                    Some(child_data) => {
                        let mut child = inst_proto(
                            defs, &child_proto, child_data, &child_path
                        )?;
                        child.is_default = child_proto.optional
                            && matches_default(&child_proto, &child);
                        inst.children.push(child);
                    }
                    None => {
                        if choice {
                            continue
                        }
                        if !child_proto.optional {
                            return Err(Error::instantiate(
                                path.to_string(),
                                format!(
                                    "Missing data for non-optional \
                                     field {}",
                                    child_proto.name
                                )
                            ))
                        }
                        if let Some(default) = child_proto.default.clone() {
                            inst.children.push(
                                default_instance(&child_proto, default)
                            );
                        }
                    }
                }
            }
            Ok(inst)
        }
        Data::Unm(unm) => {
            match unm.as_constructed() {
                Some(cons) => {
                    inst_struct_from_unm(
                        defs, &mut inst, &proto.children, cons, choice,
                        path
                    )?;
                    Ok(inst)
                }
                None => Err(type_error(path, "SEQUENCE/SET/CHOICE", data)),
            }
        }
        _ => Err(type_error(path, "SEQUENCE/SET/CHOICE", data)),
    }
}

/// Matches unmarshalled children to schema fields.
///
/// Fields with a unique tag bind directly. Otherwise a context key is
/// built from the tags of the preceding non-optional fields plus the
/// field's own first tag, and the shortest full key that ends in the
/// right tag, is long enough to account for the optional fields matched
/// so far, and contains the context tags as an ordered subsequence wins.
/// This keeps trailing fields aligned when optional fields sharing their
/// tags are absent. A child never binds twice.
fn inst_struct_from_unm(
    defs: &Definitions, inst: &mut Instance, children: &[NodeId],
    cons: &UnmarshalledConstructed, choice: bool, path: &Path
) -> Result<(), Error> {
    let mut consumed: HashSet<Vec<u8>> = HashSet::new();
    let mut ctx: Vec<Vec<u8>> = Vec::new();
    let mut matched_optional = 0;

    for &cid in children {
        let child_proto = proto_of(defs, cid);
        let child_path = path.field(&child_proto.name);
        let first = tag::first_tag(&child_proto.tags).map(<[u8]>::to_vec);

        let mut found: Option<Arc<Unmarshalled>> = None;
        if let Some(first) = &first {
            if !consumed.contains(first) {
                if let Some(child) = cons.data.get(first) {
                    found = Some(child.clone());
                    consumed.insert(first.clone());
                    // Take the full key of the same child out of play.
                    for (key, val) in &cons.data {
                        if key.last() == Some(&0)
                            && Arc::ptr_eq(val, found.as_ref().unwrap())
                        {
                            consumed.insert(key.clone());
                            break
                        }
                    }
                }
            }
        }

        if found.is_none() {
            let want: Vec<&[u8]> =
                ctx.iter().map(Vec::as_slice).collect();
            let min_tags = want.len() + 1 + matched_optional;
            let mut best: Option<(usize, &Vec<u8>)> = None;
            for key in cons.data.keys() {
                if key.last() != Some(&0) || consumed.contains(key) {
                    continue
                }
                let ktags: Vec<&[u8]> = tag::iter_tags(key).collect();
                if ktags.len() < min_tags {
                    continue
                }
                if let Some(first) = &first {
                    if ktags.last() != Some(&first.as_slice()) {
                        continue
                    }
                }
                if !is_subsequence(&want, &ktags[..ktags.len() - 1]) {
                    continue
                }
                if best.map_or(true, |(len, _)| ktags.len() < len) {
                    best = Some((ktags.len(), key));
                }
            }
            if let Some((_, key)) = best {
                found = Some(cons.data[key].clone());
                consumed.insert(key.clone());
                if let Some(first) = &first {
                    consumed.insert(first.clone());
                }
            }
        }

        match found {
            Some(child_data) => {
                let mut child = inst_proto(
                    defs, &child_proto, &Data::Unm(child_data.clone()),
                    &child_path
                )?;
                child.is_default = child_proto.optional
                    && matches_default(&child_proto, &child);
                inst.children.push(child);
                if child_proto.optional {
                    matched_optional += 1;
                }
                else {
                    let actual = child_data.tag()
                        .map(|t| vec![t])
                        .or(first)
                        .unwrap_or_default();
                    ctx.push(actual);
                }
            }
            None => {
                if choice || child_proto.optional {
                    if let Some(default) = child_proto.default.clone() {
                        inst.children.push(
                            default_instance(&child_proto, default)
                        );
                    }
                    continue
                }
                return Err(Error::instantiate(path.to_string(), format!(
                    "Missing data for non-optional field {}",
                    child_proto.name
                )))
            }
        }
    }
    Ok(())
}

fn inst_choice(
    defs: &Definitions, proto: &Proto, data: &Data, path: &Path
) -> Result<Instance, Error> {
    if let Data::Unm(unm) = data {
        let mut unm = unm.clone();
        // A declared tag wraps the chosen alternative in one more layer.
        if let Some(first) = tag::first_tag(&proto.tags) {
            if first.len() == 1 && unm.tag() == Some(first[0]) {
                let cons = match unm.as_constructed() {
                    Some(cons) => cons,
                    None => {
                        return Err(type_error(path, "CHOICE", data))
                    }
                };
                unm = match cons.member(None) {
                    Some(member) => member,
                    None => {
                        return Err(Error::instantiate(
                            path.to_string(),
                            "Tagged CHOICE is empty"
                        ))
                    }
                };
            }
        }
        // Select the alternative whose first tag matches.
        let actual = unm.tag();
        for &cid in &proto.children {
            let child_proto = proto_of(defs, cid);
            let matches = match tag::first_tag(&child_proto.tags) {
                Some(first) => {
                    first.len() == 1 && actual == Some(first[0])
                }
                None => true,
            };
            if !matches {
                continue
            }
            let child_path = path.field(&child_proto.name);
            let child = inst_proto(
                defs, &child_proto, &Data::Unm(unm.clone()), &child_path
            )?;
            let mut inst = new_instance(proto);
            inst.children.push(child);
            return Ok(inst)
        }
        return Err(Error::instantiate(path.to_string(), format!(
            "No CHOICE alternative matches tag 0x{:02X}",
            actual.unwrap_or(0)
        )))
    }

    let inst = inst_struct(defs, proto, data, true, path)?;
    if inst.children.len() != 1 {
        return Err(Error::instantiate(
            path.to_string(),
            "CHOICE must be instantiated with exactly one data element"
        ))
    }
    Ok(inst)
}

fn inst_seq_of(
    defs: &Definitions, proto: &Proto, element: NodeId, data: &Data,
    path: &Path
) -> Result<Instance, Error> {
    let element = proto_of(defs, element);
    let mut inst = new_instance(proto);
    match data {
        Data::Inst(other) => {
            for (idx, child) in other.children.iter().enumerate() {
                let child_path = path.index(idx);
                inst.children.push(inst_proto(
                    defs, &element, &Data::Inst(child.clone()),
                    &child_path
                )?);
            }
            Ok(inst)
        }
        Data::List(items) => {
            for (idx, item) in items.iter().enumerate() {
                let child_path = path.index(idx);
                inst.children.push(
                    inst_proto(defs, &element, item, &child_path)?
                );
            }
            Ok(inst)
        }
        Data::Unm(unm) => {
            let cons = match unm.as_constructed() {
                Some(cons) => cons,
                None => {
                    return Err(type_error(path, "SEQUENCE/SET OF", data))
                }
            };
            for (idx, member) in
                cons.elements_in_order().into_iter().enumerate()
            {
                let child_path = path.index(idx);
                inst.children.push(inst_proto(
                    defs, &element, &Data::Unm(member), &child_path
                )?);
            }
            Ok(inst)
        }
        _ => Err(type_error(path, "SEQUENCE/SET OF", data)),
    }
}


//------------ Primitive types -----------------------------------------------

/// Returns the identifier octet of the innermost tag of a sequence.
///
/// This is the tag that decides content interpretation, e.g. BMPString.
fn immediate_tag(tags: &[u8]) -> Option<u8> {
    if tags.len() >= 2 {
        Some(tags[tags.len() - 2])
    }
    else {
        None
    }
}

fn inst_octet_string(
    proto: &Proto, data: &Data, path: &Path
) -> Result<Instance, Error> {
    let mut inst = new_instance(proto);
    if let Some(ints) = data.as_int_list() {
        let mut bytes = Vec::with_capacity(ints.len());
        for int in ints {
            if !(0..=255).contains(&int) {
                return Err(Error::instantiate(path.to_string(), format!(
                    "Byte value out of range in OCTET STRING \
                     initializer: {}",
                    int
                )))
            }
            bytes.push(int as u8);
        }
        inst.value = Some(Value::Bytes(bytes.into()));
        return Ok(inst)
    }
    inst.value = Some(match data {
        Data::Inst(other) => {
            other.value.clone().unwrap_or(Value::Bytes(Bytes::new()))
        }
        Data::Str(string) => {
            Value::Bytes(string.as_bytes().to_vec().into())
        }
        Data::Bytes(bytes) => Value::Bytes(bytes.clone()),
        Data::Unm(unm) => {
            match unm.as_ref() {
                Unmarshalled::Primitive(prim) => {
                    if immediate_tag(&inst.tags) == Some(30) {
                        // BMPString arrives as UTF-16BE on the wire and
                        // is kept as UTF-8 in the instance.
                        Value::Bytes(decode_utf16_be(&prim.data))
                    }
                    else {
                        Value::Bytes(prim.data.clone())
                    }
                }
                _ => return Err(type_error(path, "OCTET STRING", data)),
            }
        }
        _ => return Err(type_error(path, "OCTET STRING", data)),
    });
    Ok(inst)
}

fn decode_utf16_be(data: &[u8]) -> Bytes {
    let units: Vec<u16> = data.chunks(2).map(|pair| {
        if pair.len() == 2 {
            u16::from_be_bytes([pair[0], pair[1]])
        }
        else {
            pair[0] as u16
        }
    }).collect();
    String::from_utf16_lossy(&units).into_bytes().into()
}

fn inst_boolean(
    proto: &Proto, data: &Data, path: &Path
) -> Result<Instance, Error> {
    let mut inst = new_instance(proto);
    inst.value = Some(match data {
        Data::Inst(other) => {
            other.value.clone().unwrap_or(Value::Bool(false))
        }
        Data::Bool(value) => Value::Bool(*value),
        Data::Str(string) => {
            match string.to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => {
                    return Err(Error::instantiate(
                        path.to_string(),
                        format!(
                            "Attempt to instantiate BOOLEAN from string \
                             that's neither \"true\" nor \"false\": {}",
                            string
                        )
                    ))
                }
            }
        }
        Data::Unm(unm) => {
            match unm.as_ref() {
                Unmarshalled::Primitive(prim) => {
                    Value::Bool(prim.data.first().is_some_and(|&b| b != 0))
                }
                _ => return Err(type_error(path, "BOOLEAN", data)),
            }
        }
        _ => return Err(type_error(path, "BOOLEAN", data)),
    });
    Ok(inst)
}

fn inst_null(
    proto: &Proto, data: &Data, path: &Path
) -> Result<Instance, Error> {
    let mut inst = new_instance(proto);
    inst.value = Some(match data {
        Data::Inst(other) => other.value.clone().unwrap_or(Value::Null),
        Data::Null => Value::Null,
        Data::Str(string) => {
            if string.to_ascii_lowercase() == "null" {
                Value::Null
            }
            else {
                return Err(Error::instantiate(path.to_string(), format!(
                    "Attempt to instantiate NULL from string that's \
                     not \"null\": {}",
                    string
                )))
            }
        }
        Data::Unm(unm) => {
            match unm.as_ref() {
                Unmarshalled::Primitive(prim) if prim.data.is_empty() => {
                    Value::Null
                }
                _ => return Err(type_error(path, "NULL", data)),
            }
        }
        _ => return Err(type_error(path, "NULL", data)),
    });
    Ok(inst)
}

fn inst_integer(
    proto: &Proto, data: &Data, path: &Path
) -> Result<Instance, Error> {
    let mut inst = new_instance(proto);
    inst.value = Some(match data {
        Data::Inst(other) => {
            other.value.clone().unwrap_or(Value::Int(0))
        }
        Data::Int(value) => Value::Int(*value),
        Data::Big(value) => Value::from_big(value.clone()),
        Data::Float(value) => {
            let int = *value as i64;
            if !value.is_finite() || int as f64 != *value {
                return Err(Error::instantiate(path.to_string(), format!(
                    "Attempt to instantiate INTEGER with non-integral \
                     number: {}",
                    value
                )))
            }
            Value::Int(int)
        }
        Data::Str(string) => {
            if let Some(&named) = proto.namedints.get(string.as_str()) {
                Value::Int(named)
            }
            else if let Ok(big) = string.parse::<BigInt>() {
                Value::from_big(big)
            }
            else {
                return Err(Error::instantiate(path.to_string(), format!(
                    "Attempt to instantiate INTEGER/ENUMERATED from \
                     illegal string: {}",
                    string
                )))
            }
        }
        Data::Unm(unm) => {
            match unm.as_ref() {
                Unmarshalled::Primitive(prim) if !prim.data.is_empty() => {
                    Value::from_big(
                        BigInt::from_signed_bytes_be(&prim.data)
                    )
                }
                _ => return Err(type_error(path, "INTEGER", data)),
            }
        }
        _ => return Err(type_error(path, "INTEGER", data)),
    });
    Ok(inst)
}

fn inst_enumerated(
    proto: &Proto, data: &Data, path: &Path
) -> Result<Instance, Error> {
    let inst = inst_integer(proto, data, path)?;
    if proto.namedints.is_empty() {
        // Happens only for values adopted through ANY, which have no
        // name table to check against.
        return Ok(inst)
    }
    if let Some(Value::Int(value)) = inst.value {
        if proto.namedints.values().any(|&named| named == value) {
            return Ok(inst)
        }
    }
    Err(Error::instantiate(path.to_string(), format!(
        "Attempt to instantiate ENUMERATED with number not from \
         allowed set: {:?}",
        inst.value
    )))
}

fn inst_oid(
    proto: &Proto, data: &Data, path: &Path
) -> Result<Instance, Error> {
    let mut inst = new_instance(proto);
    if let Some(ints) = data.as_int_list() {
        let mut oid = Vec::with_capacity(ints.len());
        for int in ints {
            if int < 0 {
                return Err(Error::instantiate(path.to_string(), format!(
                    "Negative component in OBJECT IDENTIFIER: {}", int
                )))
            }
            oid.push(int as u64);
        }
        inst.value = Some(Value::Oid(oid));
        return Ok(inst)
    }
    inst.value = Some(match data {
        Data::Inst(other) => {
            other.value.clone().unwrap_or(Value::Oid(Vec::new()))
        }
        Data::Str(string) => {
            let components: Result<Vec<u64>, _> = string
                .split(|c: char| !c.is_ascii_digit())
                .filter(|part| !part.is_empty())
                .map(str::parse)
                .collect();
            match components {
                Ok(components) if !components.is_empty() => {
                    Value::Oid(components)
                }
                _ => {
                    return Err(Error::instantiate(
                        path.to_string(),
                        format!(
                            "No digits found in OBJECT IDENTIFIER \
                             initializer string: {}",
                            string
                        )
                    ))
                }
            }
        }
        Data::Unm(unm) => {
            match unm.as_ref() {
                Unmarshalled::Primitive(prim) => {
                    match decode_oid_content(&prim.data) {
                        Some(oid) => Value::Oid(oid),
                        None => {
                            return Err(Error::instantiate(
                                path.to_string(),
                                "Malformed OBJECT IDENTIFIER content"
                            ))
                        }
                    }
                }
                _ => {
                    return Err(type_error(
                        path, "OBJECT IDENTIFIER", data
                    ))
                }
            }
        }
        _ => return Err(type_error(path, "OBJECT IDENTIFIER", data)),
    });
    Ok(inst)
}

/// Decodes OBJECT IDENTIFIER content octets into components.
pub(crate) fn decode_oid_content(data: &[u8]) -> Option<Vec<u64>> {
    if data.is_empty() {
        return None
    }
    let mut values = Vec::new();
    let mut acc: u64 = 0;
    let mut mid = false;
    for &byte in data {
        acc = acc.checked_mul(128)?.checked_add((byte & 0x7f) as u64)?;
        if byte & 0x80 == 0 {
            values.push(acc);
            acc = 0;
            mid = false;
        }
        else {
            mid = true;
        }
    }
    if mid {
        return None
    }
    // The first two components share the leading value as 40·a + b.
    let first = values[0];
    let (a, b) = if first < 40 {
        (0, first)
    }
    else if first < 80 {
        (1, first - 40)
    }
    else {
        (2, first - 80)
    };
    let mut oid = vec![a, b];
    oid.extend_from_slice(&values[1..]);
    Some(oid)
}

fn inst_bit_string(
    proto: &Proto, data: &Data, path: &Path
) -> Result<Instance, Error> {
    let mut inst = new_instance(proto);
    if let Some(bits) = data.as_bool_list() {
        inst.value = Some(Value::Bits(bits));
        return Ok(inst)
    }
    if let Some(ints) = data.as_int_list() {
        let mut bits = Vec::with_capacity(ints.len() * 8);
        for int in ints {
            if !(0..=255).contains(&int) {
                return Err(Error::instantiate(path.to_string(), format!(
                    "Byte value out of range in BIT STRING \
                     initializer: {}",
                    int
                )))
            }
            push_byte_bits(&mut bits, int as u8);
        }
        inst.value = Some(Value::Bits(bits));
        return Ok(inst)
    }
    inst.value = Some(match data {
        Data::Inst(other) => {
            other.value.clone().unwrap_or(Value::Bits(Vec::new()))
        }
        Data::Bytes(bytes) => {
            let mut bits = Vec::with_capacity(bytes.len() * 8);
            for &byte in bytes.iter() {
                push_byte_bits(&mut bits, byte);
            }
            Value::Bits(bits)
        }
        Data::Str(string) => {
            Value::Bits(bits_from_str(proto, string.trim(), path)?)
        }
        Data::Unm(unm) => {
            match unm.as_ref() {
                Unmarshalled::Primitive(prim) if !prim.data.is_empty() => {
                    let unused = prim.data[0] as usize;
                    if unused > 7 {
                        return Err(Error::instantiate(
                            path.to_string(),
                            "BIT STRING with more than 7 unused bits"
                        ))
                    }
                    let mut bits = Vec::with_capacity(
                        (prim.data.len() - 1) * 8
                    );
                    for &byte in &prim.data[1..] {
                        push_byte_bits(&mut bits, byte);
                    }
                    if unused > bits.len() {
                        return Err(Error::instantiate(
                            path.to_string(),
                            "BIT STRING with more unused bits than bits"
                        ))
                    }
                    bits.truncate(bits.len() - unused);
                    Value::Bits(bits)
                }
                _ => return Err(type_error(path, "BIT STRING", data)),
            }
        }
        _ => return Err(type_error(path, "BIT STRING", data)),
    });
    Ok(inst)
}

fn push_byte_bits(bits: &mut Vec<bool>, byte: u8) {
    for shift in (0..8).rev() {
        bits.push(byte & (1 << shift) != 0);
    }
}

/// Interprets a BIT STRING string initializer.
///
/// `0b…` is bits, `0x…` is four bits per digit, anything else is a list
/// of bit names separated by non-identifier characters. Whitespace is
/// allowed anywhere in the numeric forms.
fn bits_from_str(
    proto: &Proto, string: &str, path: &Path
) -> Result<Vec<bool>, Error> {
    if let Some(digits) = string.strip_prefix("0x") {
        let mut bits = Vec::new();
        for digit in digits.chars().filter(|c| !c.is_whitespace()) {
            let value = digit.to_digit(16).ok_or_else(|| {
                Error::instantiate(path.to_string(), format!(
                    "Illegal character in hex string: 0x{}", digits
                ))
            })?;
            for shift in (0..4).rev() {
                bits.push(value & (1 << shift) != 0);
            }
        }
        return Ok(bits)
    }
    if let Some(digits) = string.strip_prefix("0b") {
        let mut bits = Vec::new();
        for digit in digits.chars().filter(|c| !c.is_whitespace()) {
            match digit {
                '0' => bits.push(false),
                '1' => bits.push(true),
                _ => {
                    return Err(Error::instantiate(
                        path.to_string(),
                        format!(
                            "Illegal character in binary string: 0b{}",
                            digits
                        )
                    ))
                }
            }
        }
        return Ok(bits)
    }

    let mut bits = Vec::new();
    let names = string.split(
        |c: char| !c.is_ascii_alphanumeric() && c != '-'
    ).filter(|name| !name.is_empty());
    for name in names {
        let bitno = match proto.namedints.get(name) {
            Some(&bitno) if bitno >= 0 => bitno as usize,
            _ => {
                return Err(Error::instantiate(path.to_string(), format!(
                    "BIT STRING initializer is not a known bit name: {}",
                    name
                )))
            }
        };
        if bits.len() <= bitno {
            bits.resize(bitno + 1, false);
        }
        bits[bitno] = true;
    }
    Ok(bits)
}


//------------ ANY -----------------------------------------------------------

/// Appends a single universal tag and its placeholder.
fn append_universal(inst: &mut Instance, number: u8) {
    inst.tags.push(number);
    inst.tags.push(0);
}

/// The anonymous `ANY` element type used for adopted lists.
fn any_element() -> Proto {
    Proto {
        tags: TagSeq::new(),
        name: String::new(),
        typename: String::new(),
        basic: BasicType::Any,
        default: None,
        optional: false,
        children: Vec::new(),
        namedints: Arc::new(NamedInts::new()),
    }
}

/// Instantiates an `ANY` position by picking a basic type from the shape
/// of the input, recording the choice in the tag sequence.
fn inst_any(
    defs: &Definitions, proto: &Proto, data: &Data, path: &Path
) -> Result<Instance, Error> {
    let mut any = proto.clone();
    let inst = match data {
        Data::Inst(other) => {
            let mut inst = new_instance(proto);
            inst.tags.extend_from_slice(&other.tags);
            inst.basic = other.basic;
            inst.typename = other.typename.clone();
            inst.value = other.value.clone();
            inst.children = other.children.clone();
            inst.namedints = other.namedints.clone();
            inst.is_any = true;
            return Ok(inst)
        }
        Data::Bool(_) => {
            any.basic = BasicType::Boolean;
            let mut inst = inst_boolean(&any, data, path)?;
            retag(&mut inst, proto, &[1, 0]);
            inst
        }
        Data::Null => {
            any.basic = BasicType::Null;
            let mut inst = inst_null(&any, data, path)?;
            retag(&mut inst, proto, &[5, 0]);
            inst
        }
        Data::Int(_) | Data::Big(_) | Data::Float(_) => {
            any.basic = BasicType::Integer;
            let mut inst = inst_integer(&any, data, path)?;
            retag(&mut inst, proto, &[2, 0]);
            inst
        }
        Data::Ints(_) => {
            any.basic = BasicType::ObjectIdentifier;
            let mut inst = inst_oid(&any, data, path)?;
            retag(&mut inst, proto, &[6, 0]);
            inst
        }
        Data::Bools(_) => {
            any.basic = BasicType::BitString;
            let mut inst = inst_bit_string(&any, data, path)?;
            retag(&mut inst, proto, &[3, 0]);
            inst
        }
        Data::Bytes(_) => {
            any.basic = BasicType::OctetString;
            let mut inst = inst_octet_string(&any, data, path)?;
            retag(&mut inst, proto, &[4, 0]);
            inst
        }
        Data::Str(_) => {
            any.basic = BasicType::OctetString;
            any.typename = "UTF8String".into();
            let mut inst = inst_octet_string(&any, data, path)?;
            retag(&mut inst, proto, &[12, 0]);
            inst
        }
        Data::List(items) => {
            // A generic list becomes SEQUENCE OF ANY.
            let mut inst = new_instance(proto);
            inst.basic = BasicType::SequenceOf;
            append_universal(&mut inst, 16 | Tag::CONSTRUCTED);
            let element = any_element();
            for (idx, item) in items.iter().enumerate() {
                let child_path = path.index(idx);
                inst.children.push(
                    inst_proto(defs, &element, item, &child_path)?
                );
            }
            inst
        }
        Data::Unm(unm) => return inst_any_from_unm(defs, proto, unm, path),
        _ => return Err(type_error(path, "ANY", data)),
    };
    let mut inst = inst;
    inst.is_any = true;
    Ok(inst)
}

/// Rebuilds an instance's tag sequence as the ANY's own tags plus the
/// adopted type's tag.
fn retag(inst: &mut Instance, proto: &Proto, suffix: &[u8]) {
    let mut tags = proto.tags.clone();
    tags.extend_from_slice(suffix);
    inst.tags = tags;
}

/// Adopts a basic type for `ANY` from the tag of unmarshalled data.
fn inst_any_from_unm(
    defs: &Definitions, proto: &Proto, unm: &Arc<Unmarshalled>, path: &Path
) -> Result<Instance, Error> {
    match unm.as_ref() {
        Unmarshalled::Primitive(prim) => {
            let mut any = proto.clone();
            let number = prim.tag & !(Tag::CLASS_MASK | Tag::CONSTRUCTED);
            let universal = prim.tag & Tag::CLASS_MASK == Tag::UNIVERSAL;
            let (basic, typename) = if !universal {
                (BasicType::OctetString, "")
            }
            else {
                match number {
                    1 => (BasicType::Boolean, ""),
                    2 => (BasicType::Integer, ""),
                    3 => (BasicType::BitString, ""),
                    5 => (BasicType::Null, ""),
                    6 => (BasicType::ObjectIdentifier, ""),
                    10 => (BasicType::Enumerated, ""),
                    4 => (BasicType::OctetString, ""),
                    12 | 18..=22 | 25..=30 => (
                        BasicType::OctetString,
                        string_type_name(number)
                    ),
                    _ => {
                        return Err(Error::instantiate(
                            path.to_string(),
                            format!(
                                "Cannot adopt a type for ANY from \
                                 tag 0x{:02X}",
                                prim.tag
                            )
                        ))
                    }
                }
            };
            any.basic = basic;
            if !typename.is_empty() {
                any.typename = typename.into();
            }
            any.tags.push(prim.tag);
            any.tags.push(0);
            let data = Data::Unm(unm.clone());
            let mut inst = match basic {
                BasicType::Boolean => inst_boolean(&any, &data, path)?,
                BasicType::Integer => inst_integer(&any, &data, path)?,
                BasicType::Enumerated => {
                    inst_enumerated(&any, &data, path)?
                }
                BasicType::BitString => {
                    inst_bit_string(&any, &data, path)?
                }
                BasicType::Null => inst_null(&any, &data, path)?,
                BasicType::ObjectIdentifier => {
                    inst_oid(&any, &data, path)?
                }
                _ => inst_octet_string(&any, &data, path)?,
            };
            inst.is_any = true;
            Ok(inst)
        }
        Unmarshalled::Constructed(cons) => {
            let tag = match cons.tag {
                Some(tag) => tag,
                None => {
                    return Err(Error::instantiate(
                        path.to_string(), "Unmarshalled data is empty"
                    ))
                }
            };
            let mut inst = new_instance(proto);
            inst.basic =
                if tag & !(Tag::CLASS_MASK | Tag::CONSTRUCTED) == 17
                    && tag & Tag::CLASS_MASK == Tag::UNIVERSAL
                {
                    BasicType::SetOf
                }
                else {
                    BasicType::SequenceOf
                };
            inst.tags.push(tag);
            inst.tags.push(0);
            let element = any_element();
            for (idx, member) in
                cons.elements_in_order().into_iter().enumerate()
            {
                let child_path = path.index(idx);
                inst.children.push(inst_proto(
                    defs, &element, &Data::Unm(member), &child_path
                )?);
            }
            inst.is_any = true;
            Ok(inst)
        }
    }
}

/// The first alias of a universal string tag's name.
fn string_type_name(number: u8) -> &'static str {
    match crate::tag::universal_name(number) {
        Some(name) => name.split(',').next().unwrap_or(""),
        None => ""
    }
}


//============ Tests =========================================================
