//! Resolution of parsed definitions.
//!
//! This is a private module. It is used through [`Definitions::parse`].
//!
//! ASN.1 modules may reference definitions before they appear, alias each
//! other freely, and build values out of other values. After parsing, the
//! resolver turns this into a usable schema in phases: inject the standard
//! universal types, resolve type aliases to a fixed point, resolve the
//! types of value definitions, parse value literals, resolve value
//! references to a fixed point, and finally resolve structure fields.
//! Unknown-name errors are always diagnosed before definition loops, or
//! the loop reports would be wrong.

use std::collections::HashSet;
use log::debug;
use num_bigint::BigInt;
use crate::error::{Error, SrcPos};
use crate::node::{
    BasicType, Definitions, Node, NodeId, Role, Slot, Value,
};
use crate::tag::{Tag, TagSeq};

pub(crate) fn resolve(defs: &mut Definitions) -> Result<(), Error> {
    add_universal_types(defs);
    resolve_types(defs)?;
    resolve_value_types(defs)?;
    parse_values(defs)?;
    resolve_values(defs)?;
    resolve_fields_all(defs)?;
    Ok(())
}


//------------ Universal types -----------------------------------------------

/// The built-in types available without a definition in source.
///
/// The string types are all aliases of OCTET STRING that differ only in
/// their universal tag. The underscore spellings exist so that JSON type
/// annotations (which cannot contain spaces) resolve to a type.
const UNIVERSAL_TYPES: &[(&str, u8, BasicType)] = &[
    ("UTF8String", 12, BasicType::OctetString),
    ("NumericString", 18, BasicType::OctetString),
    ("PrintableString", 19, BasicType::OctetString),
    ("TeletexString", 20, BasicType::OctetString),
    ("T61String", 20, BasicType::OctetString),
    ("VideotexString", 21, BasicType::OctetString),
    ("IA5String", 22, BasicType::OctetString),
    ("UTCTime", 23, BasicType::OctetString),
    ("GeneralizedTime", 24, BasicType::OctetString),
    ("GraphicString", 25, BasicType::OctetString),
    ("VisibleString", 26, BasicType::OctetString),
    ("ISO646String", 26, BasicType::OctetString),
    ("GeneralString", 27, BasicType::OctetString),
    ("UniversalString", 28, BasicType::OctetString),
    ("BMPString", 30, BasicType::OctetString),
    ("SEQUENCE", 16, BasicType::Sequence),
    ("SET", 17, BasicType::Set),
    ("OCTET_STRING", 4, BasicType::OctetString),
    ("OCTETSTRING", 4, BasicType::OctetString),
    ("BIT_STRING", 3, BasicType::BitString),
    ("BITSTRING", 3, BasicType::BitString),
    ("OBJECT_IDENTIFIER", 6, BasicType::ObjectIdentifier),
    ("OBJECTIDENTIFIER", 6, BasicType::ObjectIdentifier),
    ("INTEGER", 2, BasicType::Integer),
    ("ENUMERATED", 10, BasicType::Enumerated),
    ("BOOLEAN", 1, BasicType::Boolean),
    ("NULL", 5, BasicType::Null),
];

/// Adds the standard universal types unless already defined.
///
/// A user definition of the same name, from this or an earlier module,
/// takes precedence. `SEQUENCE_OF` and `SET_OF` are injected as lists of
/// `ANY` so that type annotations produced for anonymous lists resolve.
fn add_universal_types(defs: &mut Definitions) {
    for &(name, number, basic) in UNIVERSAL_TYPES {
        if defs.typedefs.contains_key(name) {
            continue
        }
        let mut node = Node::new(Role::TypeDef, true, SrcPos::BUILTIN);
        node.name = name.into();
        node.basic = basic;
        node.source_tag = Some(Tag::universal(number));
        let id = defs.push_node(node);
        defs.typedefs.insert(name.into(), id);
    }
    for (name, basic) in [
        ("SEQUENCE_OF", BasicType::SequenceOf),
        ("SET_OF", BasicType::SetOf),
    ] {
        if defs.typedefs.contains_key(name) {
            continue
        }
        let mut element = Node::new(Role::OfElement, true, SrcPos::BUILTIN);
        element.basic = BasicType::Any;
        let element = defs.push_node(element);
        let mut node = Node::new(Role::TypeDef, true, SrcPos::BUILTIN);
        node.name = name.into();
        node.basic = basic;
        node.source_tag = Some(Tag::universal(
            basic.universal_number().unwrap()
        ));
        node.children.push(element);
        let id = defs.push_node(node);
        defs.typedefs.insert(name.into(), id);
    }
}


//------------ Tag synthesis -------------------------------------------------

/// Computes the tag sequence for a node.
///
/// An IMPLICIT declared tag replaces the natural tag of the basic type; an
/// EXPLICIT one wraps it and is always marked constructed. `CHOICE` and
/// `ANY` have no natural tag: they only get one if declared, and that tag
/// is always constructed regardless of IMPLICIT/EXPLICIT.
pub(crate) fn generate_tags(
    basic: BasicType, source_tag: Option<Tag>, implicit: bool
) -> TagSeq {
    let constructed = basic.is_constructed();
    let mut tags = TagSeq::new();
    if let Some(tag) = source_tag {
        tag.push_identifier(constructed, &mut tags);
        tags.push(0);
    }

    if matches!(basic, BasicType::Choice | BasicType::Any) {
        if !tags.is_empty() {
            tags[0] |= Tag::CONSTRUCTED;
        }
        return tags
    }

    if source_tag.is_some() {
        if !implicit {
            tags[0] |= Tag::CONSTRUCTED;
            if let Some(number) = basic.universal_number() {
                Tag::universal(number).push_identifier(
                    constructed, &mut tags
                );
                tags.push(0);
            }
        }
    }
    else if let Some(number) = basic.universal_number() {
        Tag::universal(number).push_identifier(constructed, &mut tags);
        tags.push(0);
    }

    tags
}

/// Copies the resolved shape of `src` into `dest` and merges their tags.
///
/// Children are copied as indices, so both nodes share the same child
/// nodes afterwards.
fn fillin(defs: &mut Definitions, dest_id: NodeId, src_id: NodeId) {
    let (src_basic, src_children, src_namedints, src_tags) = {
        let src = defs.node(src_id);
        (
            src.basic, src.children.clone(),
            src.namedints.clone(), src.tags.clone()
        )
    };
    let dest = defs.node_mut(dest_id);
    dest.basic = src_basic;
    dest.children = src_children;
    dest.namedints = src_namedints;

    if dest.source_tag.is_some() {
        let mut tags = generate_tags(src_basic, dest.source_tag, true);
        let mut idx = 0;
        if dest.implicit {
            // The declared tag replaces the first tag of the referenced
            // type, inheriting its constructed bit.
            if !src_tags.is_empty() {
                while src_tags[idx] != 0 {
                    idx += 1;
                }
                idx += 1;
                tags[0] |= src_tags[0] & Tag::CONSTRUCTED;
            }
        }
        else if !tags.is_empty() {
            tags[0] |= Tag::CONSTRUCTED;
        }
        tags.extend_from_slice(&src_tags[idx..]);
        dest.tags = tags;
    }
    else {
        dest.tags = src_tags;
    }
}


//------------ Type resolution -----------------------------------------------

/// Returns the names of all type definitions in deterministic order.
fn sorted_names(
    map: &std::collections::HashMap<String, NodeId>
) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}

fn resolve_types(defs: &mut Definitions) -> Result<(), Error> {
    let names = sorted_names(&defs.typedefs);
    let mut resolved = HashSet::new();

    // Types defined directly as a basic type.
    for name in &names {
        let id = defs.typedefs[name];
        let node = defs.node(id);
        if node.typename.is_empty() {
            let tags = generate_tags(
                node.basic, node.source_tag, node.implicit
            );
            defs.node_mut(id).tags = tags;
            resolved.insert(name.clone());
        }
    }

    // Types referencing another type, until a pass adds nothing new.
    let mut newinfo = true;
    while newinfo {
        newinfo = false;
        for name in &names {
            if resolved.contains(name) {
                continue
            }
            let id = defs.typedefs[name];
            let target_name = defs.node(id).typename.clone();
            if !resolved.contains(&target_name) {
                continue
            }
            let target = defs.typedefs[&target_name];
            fillin(defs, id, target);
            debug!("resolved type {} -> {}", name, target_name);
            resolved.insert(name.clone());
            newinfo = true;
        }
    }

    // Diagnose unknown references first, then loops.
    for name in &names {
        if resolved.contains(name) {
            continue
        }
        let node = defs.node(defs.typedefs[name]);
        if !defs.typedefs.contains_key(&node.typename) {
            let (src, pos) = defs.src_at(node.pos);
            return Err(Error::unknown_type(src, pos, format!(
                "Definition of type '{}' refers to unknown type '{}'",
                node.name, node.typename
            )))
        }
    }
    for name in &names {
        if resolved.contains(name) {
            continue
        }
        let node = defs.node(defs.typedefs[name]);
        let (src, pos) = defs.src_at(node.pos);
        return Err(Error::type_cycle(src, pos, format!(
            "Type definition loop '{}' -> '{}' -> ... -> '{}'",
            node.name, node.typename, node.name
        )))
    }

    Ok(())
}

fn resolve_value_types(defs: &mut Definitions) -> Result<(), Error> {
    for name in sorted_names(&defs.valuedefs) {
        let id = defs.valuedefs[&name];
        let node = defs.node(id);
        if node.typename.is_empty() {
            let tags = generate_tags(
                node.basic, node.source_tag, node.implicit
            );
            defs.node_mut(id).tags = tags;
        }
        else {
            let target = match defs.typedefs.get(&node.typename) {
                Some(&target) => target,
                None => {
                    let (src, pos) = defs.src_at(node.pos);
                    return Err(Error::unknown_type(src, pos, format!(
                        "Definition of value '{}' refers to \
                         unknown type '{}'",
                        node.name, node.typename
                    )))
                }
            };
            fillin(defs, id, target);
        }
    }
    Ok(())
}


//------------ Value literal parsing -----------------------------------------

fn is_value_reference(word: &str) -> bool {
    word.starts_with(|c: char| c.is_ascii_lowercase())
        && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// What a node is called in value error messages.
fn value_kind(node: &Node) -> &'static str {
    if node.role == Role::ValueDef {
        "value"
    }
    else {
        "DEFAULT value of field"
    }
}

fn invalid_initializer(
    defs: &Definitions, node: &Node, wanted: &str
) -> Error {
    let (src, pos) = defs.src_at(node.pos);
    Error::parse(src, pos, format!(
        "Initializer for {} '{}' is not a valid {}",
        value_kind(node), node.name, wanted
    ))
}

fn unknown_value_reference(
    defs: &Definitions, node: &Node, unk: &str
) -> Error {
    let (src, pos) = defs.src_at(node.pos);
    Error::unknown_value(src, pos, format!(
        "Definition of {} '{}' references unknown value '{}'",
        value_kind(node), node.name, unk
    ))
}

/// One token of an OBJECT IDENTIFIER literal.
enum OidPart {
    Number(u64),
    Reference(String),
}

/// Splits an OID literal like `{ iso(1) member-body(2) 840 }` into parts.
///
/// Labels with a parenthesized number collapse to the number; a bare
/// lower-case word is a reference to another value.
fn scan_oid_literal(raw: &str) -> Result<Vec<OidPart>, ()> {
    let cleaned: String = raw.chars().map(|c| {
        if c == '{' || c == '}' { ' ' } else { c }
    }).collect();
    let mut parts = Vec::new();
    let mut rest = cleaned.trim();
    while !rest.is_empty() {
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            let end = rest.find(
                |c: char| !c.is_ascii_digit()
            ).unwrap_or(rest.len());
            let number = rest[..end].parse().map_err(|_| ())?;
            parts.push(OidPart::Number(number));
            rest = rest[end..].trim_start();
        }
        else if rest.starts_with(|c: char| c.is_ascii_lowercase()) {
            let end = rest.find(
                |c: char| !c.is_ascii_alphanumeric() && c != '-'
            ).unwrap_or(rest.len());
            let word = &rest[..end];
            rest = rest[end..].trim_start();
            if let Some(tail) = rest.strip_prefix('(') {
                let close = tail.find(')').ok_or(())?;
                let number = tail[..close].trim().parse().map_err(|_| ())?;
                parts.push(OidPart::Number(number));
                rest = tail[close + 1..].trim_start();
            }
            else {
                parts.push(OidPart::Reference(word.into()));
            }
        }
        else {
            return Err(())
        }
    }
    if parts.is_empty() {
        return Err(())
    }
    Ok(parts)
}

/// Turns the raw literal text of a node into a typed value.
///
/// References to named ints are resolved immediately; references to other
/// values become `Slot::Ref`/`Slot::OidRef` and are chased later. Knowing
/// the basic type is what makes this possible, which is why literals are
/// not interpreted during the recursive descent run.
fn parse_value(defs: &mut Definitions, id: NodeId) -> Result<(), Error> {
    let raw = match &defs.node(id).value {
        Slot::Raw(raw) => raw.clone(),
        _ => return Ok(())
    };
    let node = defs.node(id);

    if is_value_reference(&raw) {
        if let Some(&number) = node.namedints.get(&raw) {
            defs.node_mut(id).value = Slot::Done(Value::Int(number));
            return Ok(())
        }
        if let Some(&target) = defs.valuedefs.get(&raw) {
            let slot = if node.basic == BasicType::ObjectIdentifier {
                Slot::OidRef(target, Vec::new())
            }
            else {
                Slot::Ref(target)
            };
            defs.node_mut(id).value = slot;
            return Ok(())
        }
        return Err(unknown_value_reference(defs, node, &raw))
    }

    let value = match node.basic {
        BasicType::OctetString => {
            if raw.len() < 2 || !raw.starts_with('"') || !raw.ends_with('"')
            {
                return Err(invalid_initializer(
                    defs, node, "string in double quotes"
                ))
            }
            Value::Bytes(raw[1..raw.len() - 1].as_bytes().to_vec().into())
        }
        BasicType::Integer | BasicType::Enumerated => {
            match raw.parse::<i64>() {
                Ok(number) => Value::Int(number),
                Err(_) => match raw.parse::<BigInt>() {
                    Ok(big) => Value::from_big(big),
                    Err(_) => {
                        return Err(invalid_initializer(
                            defs, node, "integer"
                        ))
                    }
                }
            }
        }
        BasicType::Boolean => {
            match raw.to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => {
                    return Err(invalid_initializer(
                        defs, node, "TRUE or FALSE"
                    ))
                }
            }
        }
        BasicType::Null => {
            if raw.to_ascii_lowercase() != "null" {
                return Err(invalid_initializer(defs, node, "NULL"))
            }
            Value::Null
        }
        BasicType::ObjectIdentifier => {
            let parts = match scan_oid_literal(&raw) {
                Ok(parts) => parts,
                Err(()) => {
                    return Err(invalid_initializer(
                        defs, node, "OBJECT IDENTIFIER"
                    ))
                }
            };
            let mut iter = parts.into_iter();
            let mut root = None;
            let mut components = Vec::new();
            match iter.next() {
                Some(OidPart::Reference(word)) => {
                    match defs.valuedefs.get(&word) {
                        Some(&target) => root = Some(target),
                        None => {
                            return Err(unknown_value_reference(
                                defs, node, &word
                            ))
                        }
                    }
                }
                Some(OidPart::Number(number)) => components.push(number),
                None => unreachable!(),
            }
            for part in iter {
                match part {
                    OidPart::Number(number) => components.push(number),
                    OidPart::Reference(_) => {
                        let (src, pos) = defs.src_at(node.pos);
                        return Err(Error::parse(src, pos,
                            "Only the first component of an OBJECT \
                             IDENTIFIER definition may be a reference \
                             to another value"
                        ))
                    }
                }
            }
            match root {
                Some(target) => {
                    defs.node_mut(id).value =
                        Slot::OidRef(target, components);
                    return Ok(())
                }
                None => {
                    if components.len() < 2 {
                        let (src, pos) = defs.src_at(node.pos);
                        return Err(Error::parse(src, pos,
                            "OBJECT IDENTIFIER must have at least \
                             2 components"
                        ))
                    }
                    Value::Oid(components)
                }
            }
        }
        _ => {
            let (src, pos) = defs.src_at(node.pos);
            return Err(Error::parse(src, pos, format!(
                "Literals of type {} are not supported", node.basic.name()
            )))
        }
    };

    defs.node_mut(id).value = Slot::Done(value);
    Ok(())
}

fn parse_values(defs: &mut Definitions) -> Result<(), Error> {
    for name in sorted_names(&defs.valuedefs) {
        let id = defs.valuedefs[&name];
        parse_value(defs, id)?;
    }
    Ok(())
}


//------------ Value reference resolution ------------------------------------

/// Copies the value of `target` into `id` if the target is resolved.
///
/// Returns whether anything was resolved.
fn step_resolve(defs: &mut Definitions, id: NodeId) -> Result<bool, Error> {
    let (target, suffix) = match &defs.node(id).value {
        Slot::Ref(target) => (*target, None),
        Slot::OidRef(target, suffix) => (*target, Some(suffix.clone())),
        _ => return Ok(false)
    };
    let target_value = match defs.node(target).value.done() {
        Some(value) => value.clone(),
        None => return Ok(false)
    };

    let node = defs.node(id);
    let target_node = defs.node(target);
    if target_node.basic != node.basic {
        let (src, pos) = defs.src_at(node.pos);
        let msg = if node.role == Role::Field {
            format!(
                "Cannot use value '{}' as DEFAULT for field '{}' because \
                 it has an incompatible type",
                target_node.name, node.name
            )
        }
        else {
            format!(
                "Attempt to initialize value '{}' with value '{}' of \
                 incompatible type",
                node.name, target_node.name
            )
        };
        return Err(Error::parse(src, pos, msg))
    }

    let value = match (target_value, suffix) {
        (Value::Oid(mut base), Some(suffix)) if !suffix.is_empty() => {
            base.extend_from_slice(&suffix);
            Value::Oid(base)
        }
        (value, _) => value,
    };
    defs.node_mut(id).value = Slot::Done(value);
    Ok(true)
}

fn resolve_values(defs: &mut Definitions) -> Result<(), Error> {
    let names = sorted_names(&defs.valuedefs);
    let mut newinfo = true;
    while newinfo {
        newinfo = false;
        for name in &names {
            let id = defs.valuedefs[name];
            if step_resolve(defs, id)? {
                newinfo = true;
            }
        }
    }

    for name in &names {
        let node = defs.node(defs.valuedefs[name]);
        let target = match &node.value {
            Slot::Ref(target) => *target,
            Slot::OidRef(target, _) => *target,
            _ => continue
        };
        let (src, pos) = defs.src_at(node.pos);
        return Err(Error::value_cycle(src, pos, format!(
            "Value definition loop '{}' -> '{}' -> ... -> '{}'",
            node.name, defs.node(target).name, node.name
        )))
    }
    Ok(())
}


//------------ Field resolution ----------------------------------------------

fn resolve_fields_all(defs: &mut Definitions) -> Result<(), Error> {
    for name in sorted_names(&defs.typedefs) {
        let id = defs.typedefs[&name];
        resolve_fields(defs, id)?;
    }
    Ok(())
}

/// Recursively resolves the fields and OF elements below a node.
///
/// Fields referencing a named type inline its basic type, tags, and named
/// ints but keep the child list shared by reference. Recursion into those
/// shared children is suppressed: they are resolved through their own
/// definition, and descending into them would never terminate for
/// recursive types.
fn resolve_fields(defs: &mut Definitions, id: NodeId) -> Result<(), Error> {
    let mut recurse_children = true;

    let role = defs.node(id).role;
    if role == Role::Field || role == Role::OfElement {
        let typename = defs.node(id).typename.clone();
        if !typename.is_empty() {
            let target = match defs.typedefs.get(&typename) {
                Some(&target) => target,
                None => {
                    let node = defs.node(id);
                    let (src, pos) = defs.src_at(node.pos);
                    let msg = if role == Role::OfElement {
                        format!(
                            "SEQUENCE/SET OF unknown type '{}'", typename
                        )
                    }
                    else {
                        format!(
                            "Definition of field '{}' refers to unknown \
                             type '{}'",
                            node.name, typename
                        )
                    };
                    return Err(Error::unknown_type(src, pos, msg))
                }
            };
            fillin(defs, id, target);
            recurse_children = false;
        }
        else {
            let node = defs.node(id);
            let tags = generate_tags(
                node.basic, node.source_tag, node.implicit
            );
            defs.node_mut(id).tags = tags;
        }

        if matches!(defs.node(id).value, Slot::Raw(_)) {
            parse_value(defs, id)?;
            step_resolve(defs, id)?;
            if !matches!(
                defs.node(id).value, Slot::Done(_) | Slot::None
            ) {
                let node = defs.node(id);
                let (src, pos) = defs.src_at(node.pos);
                return Err(Error::unknown_value(src, pos, format!(
                    "DEFAULT value of field '{}' could not be resolved",
                    node.name
                )))
            }
        }
    }

    if recurse_children {
        let children = defs.node(id).children.clone();
        for child in children {
            resolve_fields(defs, child)?;
        }
    }
    Ok(())
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use crate::node::{BasicType, Definitions};

    fn parse(src: &str) -> Definitions {
        let mut defs = Definitions::new();
        defs.parse(src).unwrap();
        defs
    }

    fn type_tags(defs: &Definitions, name: &str) -> Vec<u8> {
        defs.node(defs.typedefs[name]).tags.to_vec()
    }

    #[test]
    fn universal_types_are_available() {
        let defs = parse("DEFINITIONS IMPLICIT TAGS ::= BEGIN END");
        for name in ["UTF8String", "PrintableString", "UTCTime", "NULL"] {
            assert!(defs.has_type(name));
        }
        assert_eq!(type_tags(&defs, "UTF8String"), vec![12, 0]);
        assert_eq!(type_tags(&defs, "SEQUENCE"), vec![0x30, 0]);
    }

    #[test]
    fn user_definition_shadows_universal() {
        let defs = parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             UTF8String ::= [APPLICATION 7] IMPLICIT OCTET STRING END"
        );
        assert_eq!(type_tags(&defs, "UTF8String"), vec![0x47, 0]);
    }

    #[test]
    fn implicit_tag_replaces() {
        let defs = parse(
            "DEFINITIONS EXPLICIT TAGS ::= BEGIN \
             T ::= [APPLICATION 3] IMPLICIT OCTET STRING END"
        );
        assert_eq!(type_tags(&defs, "T"), vec![0x43, 0]);
    }

    #[test]
    fn explicit_tag_wraps() {
        let defs = parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             T ::= [0] EXPLICIT INTEGER END"
        );
        assert_eq!(type_tags(&defs, "T"), vec![0xa0, 0, 0x02, 0]);
    }

    #[test]
    fn alias_chain_resolves() {
        let defs = parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             A ::= B  B ::= C  C ::= INTEGER END"
        );
        assert_eq!(
            defs.node(defs.typedefs["A"]).basic, BasicType::Integer
        );
        assert_eq!(type_tags(&defs, "A"), vec![0x02, 0]);
    }

    #[test]
    fn tagged_choice_is_constructed() {
        let defs = parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             C ::= CHOICE { a INTEGER, b BOOLEAN } \
             T ::= [5] C END"
        );
        assert_eq!(type_tags(&defs, "C"), Vec::<u8>::new());
        assert_eq!(type_tags(&defs, "T"), vec![0xa5, 0]);
    }

    #[test]
    fn type_cycle_detected() {
        let mut defs = Definitions::new();
        let err = defs.parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN A ::= B  B ::= A END"
        ).unwrap_err();
        assert!(matches!(err, crate::Error::TypeCycle { .. }));
        assert!(err.to_string().contains("'A'"));
    }

    #[test]
    fn unknown_type_diagnosed_before_cycle() {
        let mut defs = Definitions::new();
        let err = defs.parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN A ::= B  B ::= Missing END"
        ).unwrap_err();
        assert!(matches!(err, crate::Error::UnknownType { .. }));
        assert!(err.to_string().contains("'Missing'"));
    }

    #[test]
    fn oid_value_rooted_in_another() {
        let defs = parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             base OBJECT IDENTIFIER ::= { 1 2 840 } \
             leaf OBJECT IDENTIFIER ::= { base 113549 } \
             alias OBJECT IDENTIFIER ::= leaf \
             END"
        );
        let inst = defs.value("leaf").unwrap();
        assert_eq!(
            inst.value(),
            Some(&crate::Value::Oid(vec![1, 2, 840, 113549]))
        );
        let inst = defs.value("alias").unwrap();
        assert_eq!(
            inst.value(),
            Some(&crate::Value::Oid(vec![1, 2, 840, 113549]))
        );
    }

    #[test]
    fn named_int_in_value() {
        let defs = parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             Version ::= INTEGER { v1(0), v2(1), v3(2) } \
             current Version ::= v3 \
             END"
        );
        let inst = defs.value("current").unwrap();
        assert_eq!(inst.value(), Some(&crate::Value::Int(2)));
    }

    #[test]
    fn value_cycle_detected() {
        let mut defs = Definitions::new();
        let err = defs.parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             a INTEGER ::= b  b INTEGER ::= a END"
        ).unwrap_err();
        assert!(matches!(err, crate::Error::ValueCycle { .. }));
    }

    #[test]
    fn incremental_parse_sees_earlier_modules() {
        let mut defs = Definitions::new();
        defs.parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             Inner ::= SEQUENCE { a INTEGER } \
             base OBJECT IDENTIFIER ::= { 1 2 3 } \
             END"
        ).unwrap();
        defs.parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             Outer ::= SEQUENCE { inner Inner, oid OBJECT IDENTIFIER } \
             leaf OBJECT IDENTIFIER ::= { base 4 } \
             END"
        ).unwrap();
        assert!(defs.has_type("Outer"));
        assert_eq!(
            defs.value("leaf").unwrap().value(),
            Some(&crate::Value::Oid(vec![1, 2, 3, 4]))
        );
    }

    #[test]
    fn default_value_links() {
        let defs = parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             answer INTEGER ::= 42 \
             T ::= SEQUENCE { a INTEGER DEFAULT answer } \
             END"
        );
        let t = defs.typedefs["T"];
        let field = defs.node(t).children[0];
        assert_eq!(
            defs.node(field).value.done(),
            Some(&crate::Value::Int(42))
        );
    }
}
