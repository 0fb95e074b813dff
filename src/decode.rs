//! Unmarshalling of DER encoded bytes into a generic tagged tree.
//!
//! This is a private module. Its public items are re-exported by the parent.
//!
//! [`unmarshal_der`] parses a byte string into a tree of
//! [`Unmarshalled`] values indexed by their tags. The tree can be handed
//! to [`Definitions::instantiate`][crate::Definitions::instantiate] to
//! reconcile it with a schema type, closing the decode–encode round trip.
//!
//! Only proper DER is accepted: definite lengths of at most three length
//! octets (a 16 MiB cap), no end-of-contents markers, and single-byte
//! tags, i.e. tag numbers below 31.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use bytes::Bytes;
use log::trace;
use crate::error::Error;
use crate::tag::{iter_tags, tag_count, Tag};


//------------ Unmarshalled --------------------------------------------------

/// A value parsed out of DER encoded bytes, without schema knowledge.
#[derive(Clone, Debug)]
pub enum Unmarshalled {
    /// A value with primitive encoding.
    Primitive(UnmarshalledPrimitive),

    /// A value with constructed encoding.
    Constructed(UnmarshalledConstructed),
}

impl Unmarshalled {
    /// Returns the identifier octet of the value.
    ///
    /// This is `None` only for the synthetic root produced by
    /// [`unmarshal_der`].
    pub fn tag(&self) -> Option<u8> {
        match self {
            Unmarshalled::Primitive(prim) => Some(prim.tag),
            Unmarshalled::Constructed(cons) => cons.tag,
        }
    }

    pub(crate) fn as_constructed(&self) -> Option<&UnmarshalledConstructed> {
        match self {
            Unmarshalled::Constructed(cons) => Some(cons),
            _ => None
        }
    }
}


//------------ UnmarshalledPrimitive -----------------------------------------

/// A primitively encoded value: a tag plus its raw content octets.
#[derive(Clone, Debug)]
pub struct UnmarshalledPrimitive {
    /// The identifier octet.
    pub tag: u8,

    /// The content octets, without tag and length.
    pub data: Bytes,
}


//------------ UnmarshalledConstructed ---------------------------------------

/// A constructed value: a tag plus its children indexed by tag keys.
///
/// Each child appears in the map under up to two keys:
///
/// * the *full key*: the identifier octets of every preceding sibling and
///   of the child itself, each followed by a zero octet. This key always
///   exists and encodes the child's position, since the *n*-th child's
///   full key contains exactly *n* tags.
/// * the *unique key*: the child's own identifier octets without a
///   trailing zero. It is only present while the tag is unique among the
///   siblings; a second sibling with the same tag removes it.
///
/// The two forms cannot collide because no identifier octet is zero.
#[derive(Clone, Debug, Default)]
pub struct UnmarshalledConstructed {
    /// The identifier octet, `None` for the synthetic root.
    pub tag: Option<u8>,

    /// The children under their tag keys.
    pub data: BTreeMap<Vec<u8>, Arc<Unmarshalled>>,
}

impl UnmarshalledConstructed {
    /// Returns the children in their original encoding order.
    ///
    /// Order is recovered from the lengths of the full keys.
    pub fn elements_in_order(&self) -> Vec<Arc<Unmarshalled>> {
        let mut keys: Vec<(usize, &Vec<u8>)> = self.data.keys()
            .filter(|key| key.last() == Some(&0))
            .map(|key| (tag_count(key), key))
            .collect();
        keys.sort();
        keys.into_iter().map(|(_, key)| self.data[key].clone()).collect()
    }

    /// Returns the child with the given tag, or the first child if `tag`
    /// is `None`.
    ///
    /// Prefers the unique key and falls back to the shortest full key
    /// ending in the wanted tag.
    pub(crate) fn member(
        &self, tag: Option<u8>
    ) -> Option<Arc<Unmarshalled>> {
        if let Some(tag) = tag {
            if let Some(child) = self.data.get(&vec![tag]) {
                return Some(child.clone())
            }
        }
        let mut best: Option<(usize, &Vec<u8>)> = None;
        for key in self.data.keys() {
            if key.last() != Some(&0) {
                continue
            }
            if let Some(tag) = tag {
                if iter_tags(key).last() != Some(&[tag][..]) {
                    continue
                }
            }
            let count = tag_count(key);
            if best.map_or(true, |(len, _)| count < len) {
                best = Some((count, key));
            }
        }
        best.map(|(_, key)| self.data[key].clone())
    }
}


//------------ unmarshal_der -------------------------------------------------

/// Parses DER encoded bytes into a generic tagged tree.
///
/// The returned constructed value is a synthetic root without a tag whose
/// children are the top-level values in `der`.
pub fn unmarshal_der(der: &[u8]) -> Result<UnmarshalledConstructed, Error> {
    unmarshal(&Bytes::copy_from_slice(der))
}

fn unmarshal(der: &Bytes) -> Result<UnmarshalledConstructed, Error> {
    let mut data = BTreeMap::new();
    let mut conflict: HashSet<Vec<u8>> = HashSet::new();
    let mut preceding: Vec<u8> = Vec::new();
    let mut idx = 0;

    while idx < der.len() {
        let tag = der[idx];
        let constructed = tag & Tag::CONSTRUCTED != 0;
        if tag & Tag::LONG_FORM == Tag::LONG_FORM {
            return Err(Error::der_decode(
                "tag numbers of 31 and up are not supported"
            ))
        }
        trace!("tag {:02x} constructed {}", tag, constructed);

        idx += 1;
        if idx >= der.len() {
            return Err(Error::der_decode("premature end of data"))
        }
        let mut length = der[idx] as usize;
        if length > 127 {
            let octets = length & 127;
            if octets == 0 {
                return Err(Error::der_decode(
                    "indefinite length not permitted in DER"
                ))
            }
            if octets > 3 {
                // Rejects structures over 16 MiB and garbage lengths.
                return Err(Error::der_decode("too many length octets"))
            }
            length = 0;
            for _ in 0..octets {
                idx += 1;
                if idx >= der.len() {
                    return Err(Error::der_decode("premature end of data"))
                }
                length = (length << 8) | der[idx] as usize;
            }
        }
        idx += 1;

        if tag == 0 && length == 0 {
            return Err(Error::der_decode(
                "end-of-contents marker not permitted in DER"
            ))
        }
        if idx + length > der.len() {
            return Err(Error::der_decode(
                "length exceeds available data"
            ))
        }

        preceding.push(tag);
        preceding.push(0);

        let contents = if constructed {
            let inner = unmarshal(&der.slice(idx..idx + length))?;
            Unmarshalled::Constructed(UnmarshalledConstructed {
                tag: Some(tag),
                data: inner.data,
            })
        }
        else {
            Unmarshalled::Primitive(UnmarshalledPrimitive {
                tag,
                data: der.slice(idx..idx + length),
            })
        };
        idx += length;

        let contents = Arc::new(contents);
        let unique = vec![tag];
        if data.contains_key(&unique) {
            data.remove(&unique);
            conflict.insert(unique);
        }
        else if !conflict.contains(&unique) {
            data.insert(unique, contents.clone());
        }
        data.insert(preceding.clone(), contents);
    }

    Ok(UnmarshalledConstructed { tag: None, data })
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simple_sequence() {
        // SEQUENCE { INTEGER 5, BOOLEAN TRUE }
        let der = [0x30, 0x06, 0x02, 0x01, 0x05, 0x01, 0x01, 0xff];
        let root = unmarshal_der(&der).unwrap();
        let seq = root.member(Some(0x30)).unwrap();
        let seq = seq.as_constructed().unwrap();
        match seq.member(Some(0x02)).unwrap().as_ref() {
            Unmarshalled::Primitive(prim) => {
                assert_eq!(prim.data.as_ref(), &[0x05]);
            }
            _ => panic!("expected primitive"),
        }
        match seq.member(Some(0x01)).unwrap().as_ref() {
            Unmarshalled::Primitive(prim) => {
                assert_eq!(prim.data.as_ref(), &[0xff]);
            }
            _ => panic!("expected primitive"),
        }
    }

    #[test]
    fn duplicate_tags_lose_unique_key() {
        // SEQUENCE { INTEGER 1, INTEGER 2 }
        let der = [0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02];
        let root = unmarshal_der(&der).unwrap();
        let seq = root.member(Some(0x30)).unwrap();
        let seq = seq.as_constructed().unwrap().clone();
        // The unique key is gone, both full keys remain.
        assert!(seq.data.get(&vec![0x02]).is_none());
        assert_eq!(seq.data.len(), 2);
        let elements = seq.elements_in_order();
        assert_eq!(elements.len(), 2);
        match elements[0].as_ref() {
            Unmarshalled::Primitive(prim) => {
                assert_eq!(prim.data.as_ref(), &[0x01]);
            }
            _ => panic!("expected primitive"),
        }
    }

    #[test]
    fn order_recovery() {
        // SEQUENCE of three booleans false, true, false.
        let der = [
            0x30, 0x09,
            0x01, 0x01, 0x00,
            0x01, 0x01, 0xff,
            0x01, 0x01, 0x00,
        ];
        let root = unmarshal_der(&der).unwrap();
        let seq = root.member(None).unwrap();
        let seq = seq.as_constructed().unwrap();
        let values: Vec<u8> = seq.elements_in_order().iter().map(|e| {
            match e.as_ref() {
                Unmarshalled::Primitive(prim) => prim.data[0],
                _ => panic!("expected primitive"),
            }
        }).collect();
        assert_eq!(values, vec![0x00, 0xff, 0x00]);
    }

    #[test]
    fn long_length() {
        let mut der = vec![0x04, 0x81, 0x80];
        der.extend(std::iter::repeat(0xab).take(128));
        let root = unmarshal_der(&der).unwrap();
        match root.member(Some(0x04)).unwrap().as_ref() {
            Unmarshalled::Primitive(prim) => {
                assert_eq!(prim.data.len(), 128);
            }
            _ => panic!("expected primitive"),
        }
    }

    #[test]
    fn rejects_malformed_input() {
        // Multi-byte tag.
        assert!(unmarshal_der(&[0x9f, 0x21, 0x01, 0x00]).is_err());
        // Indefinite length.
        assert!(unmarshal_der(&[0x30, 0x80, 0x00, 0x00]).is_err());
        // More than three length octets.
        assert!(
            unmarshal_der(&[0x04, 0x84, 0x01, 0x00, 0x00, 0x00]).is_err()
        );
        // Length exceeding the data.
        assert!(unmarshal_der(&[0x04, 0x05, 0x01]).is_err());
        // End-of-contents marker.
        assert!(unmarshal_der(&[0x00, 0x00]).is_err());
        // Truncated length.
        assert!(unmarshal_der(&[0x04]).is_err());
    }
}
