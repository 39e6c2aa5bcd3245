//! Provenance tags and the algebra over them
//!
//! Every port traversal appends one [`ParentId`] to a message's parent
//! sequence. A tag `U:I:L` records that the message was piece `I` of `L`
//! siblings produced by a single send on one connection; all siblings of
//! that send share the UUID `U`. Aggregators use the common prefix of the
//! parent sequences to decide which messages belong together.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::FlowError;

/// A single provenance tag, wire form `uuid:index:total`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParentId {
    uuid: Uuid,
    index: u32,
    total: u32,
}

/// Ordered provenance tags on a message, oldest first
pub type Parents = Vec<ParentId>;

impl ParentId {
    /// Mint a tag with a fresh UUID
    ///
    /// Used for singleton sends; siblings of one split are minted via
    /// [`ParentId::sibling`] so they share a UUID.
    pub fn mint(index: u32, total: u32) -> Result<Self, FlowError> {
        Self::sibling(Uuid::new_v4(), index, total)
    }

    /// Create a tag under an already-minted send UUID
    pub fn sibling(uuid: Uuid, index: u32, total: u32) -> Result<Self, FlowError> {
        if total == 0 {
            return Err(FlowError::parent_id(format!(
                "total must be at least 1, got {uuid}:{index}:{total}"
            )));
        }
        if index >= total {
            return Err(FlowError::parent_id(format!(
                "index out of range in {uuid}:{index}:{total}"
            )));
        }
        Ok(Self { uuid, index, total })
    }

    /// The send UUID shared by all siblings of one split
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Zero-based position within the split
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of siblings produced by the send
    pub fn total(&self) -> u32 {
        self.total
    }

    /// True if this tag closes its sibling group
    pub fn is_last_sibling(&self) -> bool {
        self.index == self.total - 1
    }

    /// True for `*:0:1` tags, i.e. messages that were not split
    pub fn is_singleton(&self) -> bool {
        self.total == 1
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.uuid, self.index, self.total)
    }
}

impl FromStr for ParentId {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, ':');
        let (uuid, index, total) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(u), Some(i), Some(l), None) => (u, i, l),
            _ => return Err(FlowError::parent_id(format!("expected uuid:index:total, got '{s}'"))),
        };
        let uuid = Uuid::parse_str(uuid)
            .map_err(|e| FlowError::parent_id(format!("bad uuid in '{s}': {e}")))?;
        let index: u32 = index
            .parse()
            .map_err(|e| FlowError::parent_id(format!("bad index in '{s}': {e}")))?;
        let total: u32 = total
            .parse()
            .map_err(|e| FlowError::parent_id(format!("bad total in '{s}': {e}")))?;
        Self::sibling(uuid, index, total)
    }
}

impl Serialize for ParentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ParentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e: FlowError| D::Error::custom(e.to_string()))
    }
}

/// Longest sequence that is a prefix of every input sequence
///
/// Returns the empty sequence when the inputs share no ancestry (or when
/// `seqs` itself is empty).
pub fn longest_common_prefix(seqs: &[&[ParentId]]) -> Parents {
    let Some(first) = seqs.first() else {
        return Vec::new();
    };
    let mut len = first.len();
    for seq in &seqs[1..] {
        len = len.min(seq.len());
        while len > 0 && seq[..len] != first[..len] {
            len -= 1;
        }
    }
    first[..len].to_vec()
}

/// The first `depth` tags of a parent sequence, used as an aggregation key
pub fn group_key(parents: &[ParentId], depth: usize) -> &[ParentId] {
    &parents[..depth.min(parents.len())]
}

/// True if the two sequences agree on every position up to the shorter length
pub fn shares_prefix(a: &[ParentId], b: &[ParentId]) -> bool {
    let len = a.len().min(b.len());
    a[..len] == b[..len]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(uuid: Uuid, index: u32, total: u32) -> ParentId {
        ParentId::sibling(uuid, index, total).unwrap()
    }

    #[test]
    fn mint_respects_bounds() {
        assert!(ParentId::mint(0, 1).is_ok());
        assert!(ParentId::mint(2, 3).is_ok());
        assert!(ParentId::mint(3, 3).is_err());
        assert!(ParentId::mint(0, 0).is_err());
    }

    #[test]
    fn wire_roundtrip() {
        let pid = ParentId::mint(1, 4).unwrap();
        let parsed: ParentId = pid.to_string().parse().unwrap();
        assert_eq!(pid, parsed);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("".parse::<ParentId>().is_err());
        assert!("abc".parse::<ParentId>().is_err());
        assert!("not-a-uuid:0:1".parse::<ParentId>().is_err());
        let u = Uuid::new_v4();
        assert!(format!("{u}:0").parse::<ParentId>().is_err());
        assert!(format!("{u}:0:1:9").parse::<ParentId>().is_err());
        assert!(format!("{u}:-1:1").parse::<ParentId>().is_err());
        assert!(format!("{u}:1:1").parse::<ParentId>().is_err());
        assert!(format!("{u}:0:0").parse::<ParentId>().is_err());
    }

    #[test]
    fn serde_uses_wire_form() {
        let pid = ParentId::mint(0, 2).unwrap();
        let json = serde_json::to_string(&pid).unwrap();
        assert_eq!(json, format!("\"{pid}\""));
        let back: ParentId = serde_json::from_str(&json).unwrap();
        assert_eq!(pid, back);
    }

    #[test]
    fn last_sibling() {
        assert!(ParentId::mint(0, 1).unwrap().is_last_sibling());
        assert!(!ParentId::mint(0, 3).unwrap().is_last_sibling());
        assert!(ParentId::mint(2, 3).unwrap().is_last_sibling());
    }

    #[test]
    fn common_prefix_of_siblings() {
        let root = tag(Uuid::new_v4(), 0, 1);
        let split = Uuid::new_v4();
        let a = vec![root, tag(split, 0, 2)];
        let b = vec![root, tag(split, 1, 2)];
        let prefix = longest_common_prefix(&[&a, &b]);
        assert_eq!(prefix, vec![root]);
    }

    #[test]
    fn common_prefix_disjoint_is_empty() {
        let a = vec![tag(Uuid::new_v4(), 0, 1)];
        let b = vec![tag(Uuid::new_v4(), 0, 1)];
        assert!(longest_common_prefix(&[&a, &b]).is_empty());
        assert!(longest_common_prefix(&[]).is_empty());
    }

    #[test]
    fn common_prefix_uneven_lengths() {
        let r1 = tag(Uuid::new_v4(), 0, 1);
        let r2 = tag(Uuid::new_v4(), 0, 1);
        let a = vec![r1, r2];
        let b = vec![r1, r2, tag(Uuid::new_v4(), 0, 1)];
        assert_eq!(longest_common_prefix(&[&a, &b]), vec![r1, r2]);
    }

    #[test]
    fn group_key_truncates() {
        let a = tag(Uuid::new_v4(), 0, 1);
        let b = tag(Uuid::new_v4(), 0, 1);
        let parents = vec![a, b];
        assert_eq!(group_key(&parents, 1), &[a][..]);
        assert_eq!(group_key(&parents, 5), &parents[..]);
        assert!(group_key(&parents, 0).is_empty());
    }

    #[test]
    fn prefix_compatibility() {
        let r = tag(Uuid::new_v4(), 0, 1);
        let a = vec![r, tag(Uuid::new_v4(), 0, 1)];
        let b = vec![r];
        assert!(shares_prefix(&a, &b));
        assert!(shares_prefix(&[], &a));
        let c = vec![tag(Uuid::new_v4(), 0, 1)];
        assert!(!shares_prefix(&a, &c));
    }
}
