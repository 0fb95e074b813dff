//! The schema graph and typed instances.
//!
//! This is a private module. Its public items are re-exported by the parent.
//!
//! The same node shape serves type definitions, value definitions, structure
//! fields, and `OF` element types. Schema nodes live in an arena owned by
//! [`Definitions`] and refer to each other by index, which lets several
//! definitions share a child list and lets recursive types close their
//! cycles without ownership loops. Concrete values are a separate owned
//! tree type, [`Instance`], that holds no references into the arena.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use bytes::Bytes;
use num_bigint::BigInt;
use crate::error::{Error, SrcPos};
use crate::instantiate::Data;
use crate::tag::{Tag, TagSeq};


//------------ BasicType -----------------------------------------------------

/// The closed set of ASN.1 kinds the toolkit distinguishes.
///
/// This is distinct from the named ASN.1 type under which a value is
/// presented: both `UTF8String` and `PrintableString` have the basic type
/// `OctetString` and differ only in their tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BasicType {
    /// Placeholder before resolution. Never present in a resolved schema.
    Unknown,
    Sequence,
    SequenceOf,
    Set,
    SetOf,
    Choice,
    OctetString,
    BitString,
    ObjectIdentifier,
    Integer,
    Enumerated,
    Boolean,
    Null,
    Any,
}

impl BasicType {
    /// Returns the name of the basic type as written in ASN.1 source.
    pub fn name(self) -> &'static str {
        match self {
            BasicType::Unknown => "UNKNOWN",
            BasicType::Sequence => "SEQUENCE",
            BasicType::SequenceOf => "SEQUENCE OF",
            BasicType::Set => "SET",
            BasicType::SetOf => "SET OF",
            BasicType::Choice => "CHOICE",
            BasicType::OctetString => "OCTET STRING",
            BasicType::BitString => "BIT STRING",
            BasicType::ObjectIdentifier => "OBJECT IDENTIFIER",
            BasicType::Integer => "INTEGER",
            BasicType::Enumerated => "ENUMERATED",
            BasicType::Boolean => "BOOLEAN",
            BasicType::Null => "NULL",
            BasicType::Any => "ANY",
        }
    }

    /// Returns the universal tag number of the basic type.
    ///
    /// `Choice` and `Any` have no tag of their own.
    pub(crate) fn universal_number(self) -> Option<u8> {
        match self {
            BasicType::Sequence | BasicType::SequenceOf => Some(16),
            BasicType::Set | BasicType::SetOf => Some(17),
            BasicType::OctetString => Some(4),
            BasicType::BitString => Some(3),
            BasicType::ObjectIdentifier => Some(6),
            BasicType::Integer => Some(2),
            BasicType::Enumerated => Some(10),
            BasicType::Boolean => Some(1),
            BasicType::Null => Some(5),
            _ => None
        }
    }

    /// Returns whether values of this basic type use constructed encoding.
    pub(crate) fn is_constructed(self) -> bool {
        matches!(
            self,
            BasicType::Sequence | BasicType::SequenceOf
                | BasicType::Set | BasicType::SetOf
        )
    }
}


//------------ Value ---------------------------------------------------------

/// The value of a primitive schema node or instance.
///
/// Compound nodes carry their content in their child list instead and have
/// no value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    /// A BOOLEAN value.
    Bool(bool),

    /// An INTEGER or ENUMERATED value that fits a machine word.
    Int(i64),

    /// An INTEGER value of arbitrary size.
    Big(BigInt),

    /// The contents of an OCTET STRING or any of the string types.
    Bytes(Bytes),

    /// The components of an OBJECT IDENTIFIER.
    Oid(Vec<u64>),

    /// The bits of a BIT STRING, most significant first.
    Bits(Vec<bool>),

    /// The NULL value.
    Null,
}

impl Value {
    /// Returns whether two values are structurally equal.
    ///
    /// Used for DEFAULT suppression. Both sides are expected to be
    /// normalized the same way, so an `Int` never equals a `Big`.
    pub(crate) fn equals(&self, other: &Value) -> bool {
        self == other
    }

    /// Normalizes a big integer into `Int` when it fits a machine word.
    pub(crate) fn from_big(big: BigInt) -> Value {
        use num_traits::ToPrimitive;

        match big.to_i64() {
            Some(small) => Value::Int(small),
            None => Value::Big(big),
        }
    }
}


//------------ Named integers ------------------------------------------------

/// The named numbers of an `INTEGER`/`ENUMERATED` type or the named bit
/// positions of a `BIT STRING` type.
pub(crate) type NamedInts = BTreeMap<String, i64>;

/// Returns the name assigned to a number, if any.
pub(crate) fn int_name(ints: &NamedInts, value: i64) -> Option<&str> {
    ints.iter().find(|(_, &v)| v == value).map(|(k, _)| k.as_str())
}


//------------ Node ----------------------------------------------------------

/// The index of a schema node within its `Definitions` arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct NodeId(pub u32);

impl NodeId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// What a schema node stands for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Role {
    /// A top-level type definition (upper-case name).
    TypeDef,

    /// A top-level value definition (lower-case name).
    ValueDef,

    /// A field of a SEQUENCE, SET, or CHOICE.
    Field,

    /// The element type of a SEQUENCE OF or SET OF.
    OfElement,
}

/// The value slot of a schema node during and after resolution.
///
/// Literals start out as raw source text and are replaced by typed values
/// while the resolver runs. The reference states only exist between the
/// literal-parsing and reference-resolution phases and never survive a
/// successful resolve.
#[derive(Clone, Debug)]
pub(crate) enum Slot {
    /// No value.
    None,

    /// Unparsed literal text from the source.
    Raw(String),

    /// A reference to another value definition.
    Ref(NodeId),

    /// An OBJECT IDENTIFIER rooted at another value plus a tail of
    /// components.
    OidRef(NodeId, Vec<u64>),

    /// A fully resolved value.
    Done(Value),
}

impl Slot {
    pub fn done(&self) -> Option<&Value> {
        match self {
            Slot::Done(value) => Some(value),
            _ => None,
        }
    }
}

/// A node of the schema graph.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub role: Role,

    /// Type definitions: the name being defined. Value definitions and
    /// fields: their lower-case name. OF elements: empty.
    pub name: String,

    /// The name of the non-basic type this node is declared as, or empty
    /// if the node is declared directly as a basic type.
    ///
    /// For a type definition this is *not* the name being defined but the
    /// name of the type it aliases. Field nodes keep their reference even
    /// after resolution so that recursive types can be instantiated.
    pub typename: String,

    /// The resolved basic type. Valid even when `typename` is non-empty.
    pub basic: BasicType,

    /// The tag declared in source, if any.
    pub source_tag: Option<Tag>,

    /// Whether the declared tag replaces the natural tag (IMPLICIT) or
    /// wraps it (EXPLICIT).
    pub implicit: bool,

    /// Fields only: the field may be omitted. If `value` is set it is the
    /// DEFAULT to fill in.
    pub optional: bool,

    /// The computed tag sequence. Filled in by the resolver.
    pub tags: TagSeq,

    /// Value definitions: the defined value. Fields: the DEFAULT value.
    pub value: Slot,

    /// Structure fields, OF element type, or empty.
    pub children: Vec<NodeId>,

    /// Named numbers or named bits, shared with every node resolved from
    /// the same definition.
    pub namedints: Arc<NamedInts>,

    /// Where in the source this node was declared.
    pub pos: SrcPos,
}

impl Node {
    pub fn new(role: Role, implicit: bool, pos: SrcPos) -> Self {
        Node {
            role,
            name: String::new(),
            typename: String::new(),
            basic: BasicType::Unknown,
            source_tag: None,
            implicit,
            optional: false,
            tags: TagSeq::new(),
            value: Slot::None,
            children: Vec::new(),
            namedints: Arc::new(NamedInts::new()),
            pos,
        }
    }
}


//------------ Definitions ---------------------------------------------------

/// A collection of parsed and resolved ASN.1 type and value definitions.
///
/// Definitions are built by one or more calls to [`parse`][Self::parse]
/// and are read-only afterwards: instantiation, encoding, and cooking never
/// mutate the schema, so a resolved `Definitions` can be shared between
/// threads.
#[derive(Clone, Debug, Default)]
pub struct Definitions {
    /// The node arena. All `NodeId`s index into this.
    pub(crate) nodes: Vec<Node>,

    /// Top-level definitions in source order. Universal types injected by
    /// the resolver are not listed here and thus not reproduced by
    /// `Display`.
    pub(crate) order: Vec<NodeId>,

    /// Type name to node.
    pub(crate) typedefs: HashMap<String, NodeId>,

    /// Value name to node.
    pub(crate) valuedefs: HashMap<String, NodeId>,

    /// Whether the first parsed module declared IMPLICIT TAGS.
    pub(crate) implicit: bool,

    /// The source texts of all `parse` calls, for diagnostics.
    pub(crate) sources: Vec<Arc<str>>,
}

impl Definitions {
    /// Creates an empty set of definitions.
    pub fn new() -> Self {
        Default::default()
    }

    /// Parses an ASN.1 module and adds its definitions.
    ///
    /// The source must contain exactly one
    /// `DEFINITIONS (IMPLICIT|EXPLICIT) TAGS ::= BEGIN … END` module.
    /// Definitions from earlier calls stay available and may be referenced
    /// by the new module. On success the definitions are fully resolved.
    ///
    /// Text after the final `END` produces a
    /// [`TrailingGarbage`][Error::TrailingGarbage] error, but the
    /// definitions up to `END` are resolved and remain usable.
    pub fn parse(&mut self, src: &str) -> Result<(), Error> {
        let trailing = crate::parse::parse_into(self, src)?;
        crate::resolve::resolve(self)?;
        match trailing {
            Some(err) => Err(err),
            None => Ok(())
        }
    }

    /// Returns whether a type of the given name is defined.
    pub fn has_type(&self, name: &str) -> bool {
        self.typedefs.contains_key(name)
    }

    /// Returns whether a value of the given name is defined.
    pub fn has_value(&self, name: &str) -> bool {
        self.valuedefs.contains_key(name)
    }

    /// Returns an instance of a parsed value definition.
    pub fn value(&self, name: &str) -> Result<Instance, Error> {
        let id = self.valuedefs.get(name).copied().ok_or_else(|| {
            Error::undefined(format!("Value '{}' is undefined", name))
        })?;
        let node = self.node(id);
        Ok(Instance {
            tags: node.tags.clone(),
            name: name.into(),
            typename: node.typename.clone(),
            basic: node.basic,
            value: node.value.done().cloned(),
            children: Vec::new(),
            namedints: node.namedints.clone(),
            is_default: false,
            is_any: false,
        })
    }

    /// Creates an instance of the named type from a generic data tree.
    ///
    /// See [`Data`] for the accepted input shapes per basic type.
    pub fn instantiate(
        &self, typename: &str, data: &Data
    ) -> Result<Instance, Error> {
        crate::instantiate::instantiate(self, typename, data)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.idx()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.idx()]
    }

    pub(crate) fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Returns the source text and offset for a node position.
    pub(crate) fn src_at(&self, pos: SrcPos) -> (&str, usize) {
        (pos.src(&self.sources), pos.offset as usize)
    }
}


//------------ Instance ------------------------------------------------------

/// A concrete value of an ASN.1 type.
///
/// Instances are produced by [`Definitions::instantiate`] and
/// [`Definitions::value`] and own their children uniquely. The named-int
/// table and tag bytes are shared with the schema they were instantiated
/// from.
#[derive(Clone, Debug)]
pub struct Instance {
    /// The computed tag sequence. Non-empty except for a `CHOICE`/`ANY`
    /// without declared tag.
    pub(crate) tags: TagSeq,

    /// The field name this instance was created for, if any.
    pub(crate) name: String,

    /// The name of the defined type this instance was created from, or
    /// empty if it was created from an anonymous type.
    pub(crate) typename: String,

    pub(crate) basic: BasicType,

    /// The value of a primitive instance, `None` for compound ones.
    pub(crate) value: Option<Value>,

    /// Child instances of a compound instance, in schema field order.
    pub(crate) children: Vec<Instance>,

    pub(crate) namedints: Arc<NamedInts>,

    /// The instance equals the DEFAULT of its field and must not be
    /// emitted in DER.
    pub(crate) is_default: bool,

    /// The instance was created through an `ANY` position, so renderings
    /// must retain its type.
    pub(crate) is_any: bool,
}

impl Instance {
    /// Returns the name of the type this instance was declared as.
    ///
    /// Falls back to the name of the basic type for anonymous types.
    pub fn declared_type(&self) -> &str {
        if self.typename.is_empty() {
            self.basic.name()
        }
        else {
            &self.typename
        }
    }

    /// Returns the basic type of the instance.
    pub fn basic_type(&self) -> BasicType {
        self.basic
    }

    /// Returns the field name of the instance, if it is a structure field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of a primitive instance.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns the children of a compound instance.
    pub fn children(&self) -> &[Instance] {
        &self.children
    }
}


//============ Tests =========================================================
