//! Schema-driven handling of ASN.1 data in Distinguished Encoding Rules.
//!
//! This crate parses ASN.1 type and value definitions from their standard
//! textual notation at runtime and uses the resulting schema to move data
//! between four representations: generic data trees, typed instances, DER
//! bytes, and JSON.
//!
//! The entry point is [`Definitions`]: feed it one or more modules via
//! [`Definitions::parse`], then
//!
//! * build a typed [`Instance`] from a [`Data`] tree with
//!   [`Definitions::instantiate`],
//! * encode an instance into DER with [`Instance::der`],
//! * parse DER bytes into a generic tagged tree with [`unmarshal_der`]
//!   and reconcile it against a schema type by passing it back to
//!   `instantiate`,
//! * render an instance as JSON with [`Instance::json`], optionally with
//!   type annotations that survive a round trip through [`cook`].
//!
//! The [`cook`] evaluator lets JSON input embed computed values: strings
//! starting with `$` are programs over a small stack language with access
//! to the parsed definitions, host-supplied functions, and variables.
//!
//! [`analyse_der`] produces a human-readable dump of DER bytes for
//! debugging.
//!
//! # Example
//!
//! ```
//! use dertool::Definitions;
//!
//! let mut defs = Definitions::new();
//! defs.parse(
//!     "DEFINITIONS IMPLICIT TAGS ::= BEGIN
//!      Greeting ::= SEQUENCE {
//!          text UTF8String,
//!          count INTEGER DEFAULT 1
//!      }
//!      END"
//! ).unwrap();
//!
//! let json: serde_json::Value =
//!     serde_json::from_str(r#"{ "text": "hello" }"#).unwrap();
//! let inst = defs.instantiate("Greeting", &json.into()).unwrap();
//! assert_eq!(
//!     inst.der(),
//!     b"\x30\x07\x0c\x05\x68\x65\x6c\x6c\x6f"
//! );
//! ```

//--- Re-exports

pub use self::analyse::analyse_der;
pub use self::cook::{cook, CookFn, CookFunctions};
pub use self::decode::{
    unmarshal_der, Unmarshalled, UnmarshalledConstructed,
    UnmarshalledPrimitive,
};
pub use self::error::Error;
pub use self::instantiate::Data;
pub use self::json::{EmbeddedDer, JsonParams};
pub use self::node::{BasicType, Definitions, Instance, Value};
pub use self::tag::Tag;


//--- Modules

mod analyse;
mod cook;
mod decode;
mod display;
mod encode;
mod error;
mod instantiate;
mod json;
mod node;
mod parse;
mod resolve;
mod tag;
