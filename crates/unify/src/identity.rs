use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::model::RawRecord;

/// Assigns stable identities to one source's records within a collection.
///
/// Identity is the record's identity attribute (e.g. SKU) when present, else
/// its trimmed, lower-cased display name. Repeats get an ordinal so duplicate
/// names stay distinct and the numbering only depends on input order.
pub struct IdentityAssigner<'a> {
    collection_id: &'a str,
    source_id: &'a str,
    identity_field: &'a str,
    seen: HashMap<String, usize>,
}

impl<'a> IdentityAssigner<'a> {
    pub fn new(collection_id: &'a str, source_id: &'a str, identity_field: &'a str) -> Self {
        Self {
            collection_id,
            source_id,
            identity_field,
            seen: HashMap::new(),
        }
    }

    pub fn next_id(&mut self, record: &RawRecord) -> String {
        let identity = match record.attr(self.identity_field) {
            Some(value) => format!("{}={}", self.identity_field, value.trim()),
            None => format!("name={}", record.display_name.trim().to_lowercase()),
        };
        let ordinal = self.seen.entry(identity.clone()).or_insert(0);
        let id = canonical_id(self.collection_id, self.source_id, &identity, *ordinal);
        *ordinal += 1;
        id
    }
}

/// `cat_` + 16 hex chars of SHA-256 over the NUL-separated parts.
pub fn canonical_id(collection_id: &str, source_id: &str, identity: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    for part in [collection_id, source_id, identity] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(ordinal.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("cat_{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_and_prefixed() {
        let a = canonical_id("roland", "inventory", "sku=R-1", 0);
        let b = canonical_id("roland", "inventory", "sku=R-1", 0);
        assert_eq!(a, b);
        assert!(a.starts_with("cat_"));
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn parts_are_separated() {
        assert_ne!(
            canonical_id("ab", "c", "x", 0),
            canonical_id("a", "bc", "x", 0)
        );
    }

    #[test]
    fn duplicate_names_get_distinct_ids() {
        let mut ids = IdentityAssigner::new("boss", "site", "sku");
        let r = RawRecord::new("site", "boss", "DS-1 Distortion");
        let first = ids.next_id(&r);
        let second = ids.next_id(&r);
        assert_ne!(first, second);

        let mut again = IdentityAssigner::new("boss", "site", "sku");
        assert_eq!(again.next_id(&r), first);
        assert_eq!(again.next_id(&r), second);
    }

    #[test]
    fn identity_attribute_beats_name() {
        let mut ids = IdentityAssigner::new("boss", "inventory", "sku");
        let a = RawRecord::new("inventory", "boss", "DS-1").with_attr("sku", "B-100");
        let b = RawRecord::new("inventory", "boss", "DS-1 Distortion Pedal").with_attr("sku", "B-100");
        let id_a = ids.next_id(&a);
        let mut fresh = IdentityAssigner::new("boss", "inventory", "sku");
        assert_eq!(fresh.next_id(&b), id_a);
    }
}
