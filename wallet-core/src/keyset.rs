//! Per-mint keyset cache
//!
//! Owned by the wallet facade; other components borrow it read-only.
//! Inactive keysets stay resolvable so old proofs remain redeemable,
//! new issuance only ever targets an active keyset.

use std::collections::BTreeMap;

use crate::nuts::{Id, KeySet, KeySetInfo, Keys};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No active keyset for unit {0}")]
    NoActiveKeyset(String),
    #[error("Unknown keyset {0}")]
    UnknownKeyset(Id),
    #[error(transparent)]
    Invalid(#[from] crate::nuts::nut02::Error),
}

#[derive(Debug, Clone)]
struct Entry {
    keyset: KeySet,
    active: bool,
}

/// Cache of one mint's keysets
#[derive(Debug, Default, Clone)]
pub struct KeysetCache {
    entries: BTreeMap<Id, Entry>,
}

impl KeysetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace cached keys with a fresh /v1/keys + /v1/keysets pull.
    ///
    /// Every keyset is structurally verified before it lands in the
    /// cache; ids missing from `infos` are treated as inactive.
    pub fn update(&mut self, keysets: Vec<KeySet>, infos: &[KeySetInfo]) -> Result<(), Error> {
        for keyset in keysets {
            keyset.verify()?;

            let active = infos
                .iter()
                .find(|i| i.id == keyset.id)
                .map(|i| i.active)
                .unwrap_or(false);

            self.entries.insert(keyset.id, Entry { keyset, active });
        }

        // flags may change without the keys themselves changing
        for info in infos {
            if let Some(entry) = self.entries.get_mut(&info.id) {
                entry.active = info.active;
            }
        }

        Ok(())
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &Id) -> Option<&KeySet> {
        self.entries.get(id).map(|e| &e.keyset)
    }

    pub fn keys(&self, id: &Id) -> Result<&Keys, Error> {
        self.entries
            .get(id)
            .map(|e| &e.keyset.keys)
            .ok_or(Error::UnknownKeyset(*id))
    }

    pub fn is_active(&self, id: &Id) -> bool {
        self.entries.get(id).map(|e| e.active).unwrap_or(false)
    }

    /// The keyset new outputs should be issued under
    pub fn active_for_unit(&self, unit: &str) -> Result<&KeySet, Error> {
        self.entries
            .values()
            .find(|e| e.active && e.keyset.unit.as_str() == unit)
            .map(|e| &e.keyset)
            .ok_or_else(|| Error::NoActiveKeyset(unit.to_owned()))
    }

    pub fn ids(&self) -> Vec<Id> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::nuts::KeysetResponse;

    fn keysets() -> Vec<KeySet> {
        serde_json::from_str::<crate::nuts::KeysResponse>(
            r#"{"keysets": [
                {"id":"009a1f293253e41e","unit":"sat","keys":{"1":"03a40f20667ed53513075dc51e715ff2046cad64eb68960632269ba7f0210e38bc"}},
                {"id":"00ad268c4d1f5826","unit":"sat","keys":{"1":"03fd4ce5a16b65576145949e6f99f445f8249fee17c606b688b504a849cdc452de"}},
                {"id":"00c074b96c7e2b0e","unit":"usd","keys":{"1":"02648eccfa4c026960966276fa5a4cae46ce0fd432211a4f449bf84f13aa5f8303"}}
            ]}"#,
        )
        .unwrap()
        .keysets
    }

    fn infos() -> Vec<KeySetInfo> {
        serde_json::from_str::<KeysetResponse>(
            r#"{"keysets":[
                {"id":"009a1f293253e41e","unit":"sat","active":false},
                {"id":"00ad268c4d1f5826","unit":"sat","active":true},
                {"id":"00c074b96c7e2b0e","unit":"usd","active":true}
            ]}"#,
        )
        .unwrap()
        .keysets
    }

    #[test]
    fn test_active_selection() {
        let mut cache = KeysetCache::new();
        cache.update(keysets(), &infos()).unwrap();
        assert_eq!(cache.len(), 3);

        let sat = cache.active_for_unit("sat").unwrap();
        assert_eq!(sat.id, Id::from_str("00ad268c4d1f5826").unwrap());

        let usd = cache.active_for_unit("usd").unwrap();
        assert_eq!(usd.id, Id::from_str("00c074b96c7e2b0e").unwrap());

        assert!(matches!(
            cache.active_for_unit("eur"),
            Err(Error::NoActiveKeyset(_))
        ));
    }

    #[test]
    fn test_inactive_still_resolvable() {
        let mut cache = KeysetCache::new();
        cache.update(keysets(), &infos()).unwrap();

        let old = Id::from_str("009a1f293253e41e").unwrap();
        assert!(!cache.is_active(&old));
        assert!(cache.keys(&old).is_ok());
    }

    #[test]
    fn test_flag_update_without_keys() {
        let mut cache = KeysetCache::new();
        cache.update(keysets(), &infos()).unwrap();

        let mut flipped = infos();
        flipped[0].active = true;
        flipped[1].active = false;
        cache.update(vec![], &flipped).unwrap();

        assert!(cache.is_active(&Id::from_str("009a1f293253e41e").unwrap()));
        assert!(!cache.is_active(&Id::from_str("00ad268c4d1f5826").unwrap()));
    }

    #[test]
    fn test_unknown_keyset() {
        let cache = KeysetCache::new();
        let id = Id::from_str("00759e3f8b06b36f").unwrap();
        assert!(matches!(cache.keys(&id), Err(Error::UnknownKeyset(_))));
    }
}
