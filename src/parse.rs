//! Parsing of ASN.1 module text.
//!
//! This is a private module. It is used through [`Definitions::parse`].
//!
//! The parser is a hand-written recognizer for the subset of X.680 needed
//! for certificate work: one `DEFINITIONS … BEGIN … END` module per call,
//! type and value assignments, tagged and nested structure types, named
//! numbers and bits, and the usual string types via type references. Size
//! and range constraints are recognized and skipped. `IMPORTS`/`EXPORTS`
//! are not supported.
//!
//! Literals are captured as raw text here and turned into typed values by
//! the resolver, which knows the basic type they must conform to.

use std::sync::Arc;
use log::trace;
use crate::error::{Error, SrcPos, line_col};
use crate::node::{BasicType, Definitions, NamedInts, Node, NodeId, Role, Slot};
use crate::tag::Tag;

/// Parses one module from `src` into `defs`.
///
/// On success returns the trailing-garbage error to be reported after
/// resolution, if any.
pub(crate) fn parse_into(
    defs: &mut Definitions, src: &str
) -> Result<Option<Error>, Error> {
    let source = defs.sources.len();
    defs.sources.push(Arc::from(src));
    let mut parser = Parser {
        defs, src, source, pos: 0, implicit: true,
    };
    parser.parse_module()
}


//------------ Parser --------------------------------------------------------

struct Parser<'a> {
    defs: &'a mut Definitions,
    src: &'a str,
    source: usize,
    pos: usize,

    /// The module-wide tagging default from the DEFINITIONS header.
    implicit: bool,
}

impl<'a> Parser<'a> {
    //--- Low-level scanning

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    /// Skips whitespace and `-- … --|\n` comments.
    fn skip(&mut self) {
        loop {
            let trimmed = self.rest().trim_start();
            self.pos = self.src.len() - trimmed.len();
            if let Some(rest) = trimmed.strip_prefix("--") {
                let mut end = rest.len();
                let mut skip = 0;
                if let Some(i) = rest.find("--") {
                    end = i;
                    skip = 2;
                }
                if let Some(i) = rest.find('\n') {
                    if i < end {
                        end = i;
                        skip = 1;
                    }
                }
                self.pos = self.src.len() - rest.len() + end + skip;
            }
            else {
                break
            }
        }
    }

    fn src_pos(&self) -> SrcPos {
        SrcPos::new(self.source, self.pos)
    }

    fn err(&self, pos: usize, msg: impl Into<String>) -> Error {
        Error::parse(self.src, pos, msg)
    }

    /// Produces the `Expected X instead of 'got'` error.
    fn expected(&self, what: &str) -> Error {
        let got = self.rest().split_whitespace().next().unwrap_or("");
        self.err(
            self.pos,
            format!("Expected {} instead of '{}'", what, got)
        )
    }

    /// Returns the identifier at the current position without consuming it.
    fn peek_ident(&mut self) -> Option<&'a str> {
        self.skip();
        let rest = self.rest();
        let first = rest.chars().next()?;
        if !first.is_ascii_alphabetic() {
            return None
        }
        let end = rest.find(
            |c: char| !c.is_ascii_alphanumeric() && c != '-'
        ).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    fn take_ident(&mut self) -> Option<(&'a str, usize)> {
        let ident = self.peek_ident()?;
        let pos = self.pos;
        self.pos += ident.len();
        Some((ident, pos))
    }

    /// Consumes the given punctuation if present.
    fn eat(&mut self, lit: &str) -> bool {
        self.skip();
        if self.rest().starts_with(lit) {
            self.pos += lit.len();
            true
        }
        else {
            false
        }
    }

    fn expect(&mut self, lit: &str) -> Result<(), Error> {
        if self.eat(lit) {
            Ok(())
        }
        else {
            Err(self.expected(&format!("'{}'", lit)))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), Error> {
        match self.take_ident() {
            Some((ident, _)) if ident == word => Ok(()),
            _ => Err(self.expected(&format!("'{}'", word)))
        }
    }

    /// Consumes a possibly signed decimal number.
    fn take_number(&mut self) -> Option<(&'a str, usize)> {
        self.skip();
        let rest = self.rest();
        let digits = rest.strip_prefix('-').unwrap_or(rest);
        let len = digits.len() - digits.trim_start_matches(
            |c: char| c.is_ascii_digit()
        ).len();
        if len == 0 {
            return None
        }
        let total = rest.len() - digits.len() + len;
        let pos = self.pos;
        self.pos += total;
        Some((&rest[..total], pos))
    }

    /// Skips a balanced parenthesized group. The opening parenthesis has
    /// already been consumed.
    fn skip_parens(&mut self) -> Result<(), Error> {
        let start = self.pos;
        let mut depth = 1;
        for (i, ch) in self.rest().char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += i + 1;
                        return Ok(())
                    }
                }
                _ => {}
            }
        }
        Err(self.err(start, "Unterminated '(...)'"))
    }

    //--- The grammar

    fn parse_module(&mut self) -> Result<Option<Error>, Error> {
        self.expect_keyword("DEFINITIONS")?;
        match self.take_ident() {
            Some(("IMPLICIT", _)) => self.implicit = true,
            Some(("EXPLICIT", _)) => self.implicit = false,
            _ => return Err(self.expected("'IMPLICIT TAGS' or 'EXPLICIT TAGS'")),
        }
        self.expect_keyword("TAGS")?;
        self.expect("::=")?;
        self.expect_keyword("BEGIN")?;
        self.defs.implicit = self.implicit;

        loop {
            self.skip();
            let (ident, pos) = match self.take_ident() {
                Some(some) => some,
                None => {
                    return Err(self.expected(
                        "'END', 'type name' or 'value name'"
                    ))
                }
            };
            if ident == "END" {
                break
            }
            if ident.starts_with(|c: char| c.is_ascii_uppercase()) {
                self.parse_type_def(ident, pos)?;
            }
            else {
                self.parse_value_def(ident, pos)?;
            }
        }

        self.skip();
        if self.pos < self.src.len() {
            Ok(Some(Error::trailing_garbage(self.src, self.pos)))
        }
        else {
            Ok(None)
        }
    }

    /// Reports a duplicate definition, pointing at both locations.
    fn redefined(
        &self, what: &str, name: &str, pos: usize, earlier: NodeId
    ) -> Error {
        let (esrc, epos) = self.defs.src_at(self.defs.node(earlier).pos);
        let (line, col) = line_col(esrc, epos);
        let (l, c) = line_col(self.src, pos);
        Error::Redefinition {
            line: l, col: c,
            msg: format!(
                "{} '{}' redefined \
                 (line {} col {}: earlier definition is here)",
                what, name, line, col
            ),
        }
    }

    fn parse_type_def(
        &mut self, name: &'a str, pos: usize
    ) -> Result<(), Error> {
        if let Some(&earlier) = self.defs.typedefs.get(name) {
            return Err(self.redefined("Type", name, pos, earlier))
        }
        trace!("type definition {}", name);
        let mut node = Node::new(
            Role::TypeDef, self.implicit, SrcPos::new(self.source, pos)
        );
        node.name = name.into();
        let id = self.defs.push_node(node);
        self.expect("::=")?;
        self.parse_type(id)?;
        self.defs.typedefs.insert(name.into(), id);
        self.defs.order.push(id);
        Ok(())
    }

    fn parse_value_def(
        &mut self, name: &'a str, pos: usize
    ) -> Result<(), Error> {
        if let Some(&earlier) = self.defs.valuedefs.get(name) {
            return Err(self.redefined("Value", name, pos, earlier))
        }
        trace!("value definition {}", name);
        let mut node = Node::new(
            Role::ValueDef, self.implicit, SrcPos::new(self.source, pos)
        );
        node.name = name.into();

        match self.take_ident() {
            Some(("OBJECT", _)) => {
                self.expect_keyword("IDENTIFIER")?;
                node.basic = BasicType::ObjectIdentifier;
            }
            Some(("OCTET", _)) => {
                self.expect_keyword("STRING")?;
                node.basic = BasicType::OctetString;
            }
            Some(("BIT", _)) => {
                self.expect_keyword("STRING")?;
                node.basic = BasicType::BitString;
            }
            Some(("INTEGER", _)) => node.basic = BasicType::Integer,
            Some(("ANY", _)) => node.basic = BasicType::Any,
            Some((ident, _))
                if ident.starts_with(|c: char| c.is_ascii_uppercase())
            => {
                node.typename = ident.into();
            }
            _ => return Err(self.expected("'type of value'")),
        }

        self.expect("::=")?;
        let (raw, _) = self.parse_literal()?;
        node.value = Slot::Raw(raw);
        let id = self.defs.push_node(node);
        self.defs.valuedefs.insert(name.into(), id);
        self.defs.order.push(id);
        Ok(())
    }

    /// Parses a type specification into the given node.
    ///
    /// Covers the optional `[tag]` and `IMPLICIT`/`EXPLICIT` prefixes (each
    /// at most once, in either order), the type proper, and trailing
    /// constraint groups.
    fn parse_type(&mut self, id: NodeId) -> Result<(), Error> {
        let mut seen_tag = false;
        let mut seen_plicit = false;
        loop {
            self.skip();
            if !seen_tag && self.rest().starts_with('[') {
                self.parse_tag(id)?;
                seen_tag = true;
                continue
            }
            if !seen_plicit {
                match self.peek_ident() {
                    Some("IMPLICIT") => {
                        self.take_ident();
                        self.defs.node_mut(id).implicit = true;
                        seen_plicit = true;
                        continue
                    }
                    Some("EXPLICIT") => {
                        self.take_ident();
                        self.defs.node_mut(id).implicit = false;
                        seen_plicit = true;
                        continue
                    }
                    _ => {}
                }
            }
            break
        }

        let type_pos = self.pos;
        let ident = match self.take_ident() {
            Some((ident, _)) => ident,
            None => return Err(self.expected("'type definition'")),
        };
        match ident {
            "OCTET" => {
                self.expect_keyword("STRING")?;
                self.defs.node_mut(id).basic = BasicType::OctetString;
            }
            "BIT" => {
                self.expect_keyword("STRING")?;
                self.defs.node_mut(id).basic = BasicType::BitString;
                if self.eat("{") {
                    self.parse_named_ints(id)?;
                }
            }
            "OBJECT" => {
                self.expect_keyword("IDENTIFIER")?;
                self.defs.node_mut(id).basic = BasicType::ObjectIdentifier;
            }
            "INTEGER" => {
                self.defs.node_mut(id).basic = BasicType::Integer;
                if self.eat("{") {
                    self.parse_named_ints(id)?;
                }
            }
            "ENUMERATED" => {
                self.defs.node_mut(id).basic = BasicType::Enumerated;
                if !self.eat("{") {
                    return Err(self.err(
                        type_pos,
                        "ENUMERATED without {...} enumeration list"
                    ))
                }
                self.parse_named_ints(id)?;
            }
            "SEQUENCE" | "SET" => {
                if self.peek_ident() == Some("SIZE") {
                    self.take_ident();
                    self.expect("(")?;
                    self.skip_parens()?;
                }
                if self.peek_ident() == Some("OF") {
                    self.take_ident();
                    self.defs.node_mut(id).basic = if ident == "SEQUENCE" {
                        BasicType::SequenceOf
                    }
                    else {
                        BasicType::SetOf
                    };
                    let child = Node::new(
                        Role::OfElement, self.implicit, self.src_pos()
                    );
                    let child = self.defs.push_node(child);
                    self.defs.node_mut(id).children.push(child);
                    self.parse_type(child)?;
                    // Constraints were consumed by the element type.
                    return Ok(())
                }
                self.expect("{")?;
                self.defs.node_mut(id).basic = if ident == "SEQUENCE" {
                    BasicType::Sequence
                }
                else {
                    BasicType::Set
                };
                self.parse_fields(id)?;
            }
            "CHOICE" => {
                self.expect("{")?;
                self.defs.node_mut(id).basic = BasicType::Choice;
                self.parse_fields(id)?;
            }
            "ANY" => {
                self.defs.node_mut(id).basic = BasicType::Any;
                if self.peek_ident() == Some("DEFINED") {
                    self.take_ident();
                    self.expect_keyword("BY")?;
                    if self.take_ident().is_none() {
                        return Err(self.expected("'value name'"))
                    }
                }
            }
            _ if ident.starts_with(|c: char| c.is_ascii_uppercase()) => {
                self.defs.node_mut(id).typename = ident.into();
            }
            _ => return Err(self.expected("'type definition'")),
        }

        // Skip (SIZE(..)) and (lo..hi) constraint groups.
        while self.eat("(") {
            self.skip_parens()?;
        }
        Ok(())
    }

    /// Parses a `[CLASS n]` tag. The bracket has not been consumed yet.
    fn parse_tag(&mut self, id: NodeId) -> Result<(), Error> {
        self.expect("[")?;
        let mut class = Tag::CONTEXT;
        if let Some(ident) = self.peek_ident() {
            class = match ident {
                "UNIVERSAL" => Tag::UNIVERSAL,
                "APPLICATION" => Tag::APPLICATION,
                "PRIVATE" => Tag::PRIVATE,
                _ => return Err(self.expected("'UNIVERSAL', 'APPLICATION' \
                                               or 'PRIVATE'")),
            };
            self.take_ident();
        }
        let (digits, pos) = match self.take_number() {
            Some(some) => some,
            None => return Err(self.expected("'tag number'")),
        };
        let number = digits.parse::<i64>().map_err(|_| {
            self.err(pos, format!("Tag number out of range: {}", digits))
        })?;
        if !(0..=Tag::MAX_NUMBER as i64).contains(&number) {
            return Err(self.err(
                pos, format!("Tag number out of range: {}", number)
            ))
        }
        self.expect("]")?;
        self.defs.node_mut(id).source_tag =
            Some(Tag::new(class, number as u8));
        Ok(())
    }

    /// Parses the fields of a SEQUENCE, SET, or CHOICE up to and including
    /// the closing brace.
    fn parse_fields(&mut self, parent: NodeId) -> Result<(), Error> {
        loop {
            self.skip();
            let (name, pos) = match self.take_ident() {
                Some((ident, pos))
                    if ident.starts_with(|c: char| c.is_ascii_lowercase())
                => (ident, pos),
                _ => return Err(self.expected("'field name'")),
            };
            let mut node = Node::new(
                Role::Field, self.implicit, SrcPos::new(self.source, pos)
            );
            node.name = name.into();
            let child = self.defs.push_node(node);
            self.defs.node_mut(parent).children.push(child);
            self.parse_type(child)?;

            let mut seen_opt = false;
            loop {
                match self.peek_ident() {
                    Some("DEFAULT") if !seen_opt => {
                        self.take_ident();
                        let (raw, _) = self.parse_literal()?;
                        let node = self.defs.node_mut(child);
                        node.value = Slot::Raw(raw);
                        node.optional = true;
                        seen_opt = true;
                    }
                    Some("OPTIONAL") if !seen_opt => {
                        self.take_ident();
                        self.defs.node_mut(child).optional = true;
                        seen_opt = true;
                    }
                    _ => break,
                }
            }

            if self.eat(",") {
                continue
            }
            self.expect("}")?;
            return Ok(())
        }
    }

    /// Parses a `name(number), …}` list into the node's named-int table.
    /// The opening brace has already been consumed.
    fn parse_named_ints(&mut self, id: NodeId) -> Result<(), Error> {
        let mut ints = NamedInts::new();
        loop {
            self.skip();
            let name = match self.take_ident() {
                Some((ident, _))
                    if ident.starts_with(|c: char| c.is_ascii_lowercase())
                => ident,
                _ => return Err(self.expected("'name(int)'")),
            };
            self.expect("(")?;
            let (digits, pos) = match self.take_number() {
                Some(some) => some,
                None => return Err(self.expected("'name(int)'")),
            };
            let value = digits.parse::<i64>().map_err(|_| {
                self.err(pos, format!("Number out of range: {}", digits))
            })?;
            self.expect(")")?;
            ints.insert(name.into(), value);
            if self.eat(",") {
                continue
            }
            self.expect("}")?;
            break
        }
        self.defs.node_mut(id).namedints = Arc::new(ints);
        Ok(())
    }

    /// Captures a value literal as raw text.
    ///
    /// Recognized forms: `{ … }` OBJECT IDENTIFIER braces, double-quoted
    /// strings, signed integers of arbitrary length, `TRUE`, `FALSE`,
    /// `NULL`, and references to other lower-case value names.
    fn parse_literal(&mut self) -> Result<(String, usize), Error> {
        self.skip();
        let pos = self.pos;
        let rest = self.rest();
        if rest.starts_with('{') {
            match rest.find('}') {
                Some(end) => {
                    self.pos += end + 1;
                    return Ok((rest[..end + 1].into(), pos))
                }
                None => return Err(self.err(pos, "Unterminated '{...}'")),
            }
        }
        if let Some(tail) = rest.strip_prefix('"') {
            match tail.find('"') {
                Some(end) => {
                    self.pos += end + 2;
                    return Ok((rest[..end + 2].into(), pos))
                }
                None => {
                    return Err(self.err(pos, "Unterminated string literal"))
                }
            }
        }
        if let Some((digits, pos)) = self.take_number() {
            return Ok((digits.into(), pos))
        }
        if let Some((ident, pos)) = self.take_ident() {
            return Ok((ident.into(), pos))
        }
        Err(self.expected("'value'"))
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use crate::node::Definitions;

    #[test]
    fn minimal_module() {
        let mut defs = Definitions::new();
        defs.parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             T ::= SEQUENCE { a INTEGER, b BOOLEAN DEFAULT TRUE } \
             END"
        ).unwrap();
        assert!(defs.has_type("T"));
        assert!(defs.has_type("INTEGER"));
    }

    #[test]
    fn comments_are_skipped() {
        let mut defs = Definitions::new();
        defs.parse(
            "-- leading comment --\n\
             DEFINITIONS EXPLICIT TAGS ::= BEGIN\n\
             -- a comment to end of line\n\
             T ::= -- inline -- INTEGER\n\
             END"
        ).unwrap();
        assert!(defs.has_type("T"));
    }

    #[test]
    fn trailing_garbage_keeps_definitions() {
        let mut defs = Definitions::new();
        let err = defs.parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN T ::= INTEGER END \
             some trailing noise"
        ).unwrap_err();
        assert!(matches!(err, crate::Error::TrailingGarbage { .. }));
        assert!(defs.has_type("T"));
    }

    #[test]
    fn tag_number_range() {
        let mut defs = Definitions::new();
        let err = defs.parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN T ::= [64] INTEGER END"
        ).unwrap_err();
        assert!(err.to_string().contains("Tag number out of range"));
    }

    #[test]
    fn enumerated_needs_list() {
        let mut defs = Definitions::new();
        let err = defs.parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN T ::= ENUMERATED END"
        ).unwrap_err();
        assert!(err.to_string().contains("ENUMERATED without"));
    }

    #[test]
    fn type_redefinition() {
        let mut defs = Definitions::new();
        let err = defs.parse(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             T ::= INTEGER T ::= BOOLEAN END"
        ).unwrap_err();
        assert!(err.to_string().contains("redefined"));
    }

    #[test]
    fn nested_structures() {
        let mut defs = Definitions::new();
        defs.parse(
            "DEFINITIONS EXPLICIT TAGS ::= BEGIN\n\
             Point ::= SEQUENCE { x INTEGER, y INTEGER }\n\
             Path ::= SEQUENCE SIZE (1..128) OF Point\n\
             Shade ::= ENUMERATED { light(0), dark(1) }\n\
             Flags ::= BIT STRING { up(0), down(1) }\n\
             Pick ::= CHOICE { num [0] INTEGER, who [1] IA5String }\n\
             END"
        ).unwrap();
        for name in ["Point", "Path", "Shade", "Flags", "Pick"] {
            assert!(defs.has_type(name), "{} missing", name);
        }
    }
}
