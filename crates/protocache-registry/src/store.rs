//! In-memory descriptor store.
//!
//! Holds exactly one live [`Snapshot`] behind an `ArcSwap`. Readers load
//! the current `Arc<Snapshot>` without locking; writers build the next
//! snapshot off to the side and publish it with a compare-and-swap, retrying
//! if another writer got there first. A reader therefore sees either the
//! snapshot before a `merge`/`replace` or the one after, never a mix.

use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

use crate::descriptor::TypeDefinition;

/// Immutable name → definition mapping at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    types: HashMap<String, TypeDefinition>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeDefinition)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl From<HashMap<String, TypeDefinition>> for Snapshot {
    fn from(types: HashMap<String, TypeDefinition>) -> Self {
        Self { types }
    }
}

/// Thread-safe descriptor store. Share it between collaborators with `Arc`.
pub struct DescriptorStore {
    current: ArcSwap<Snapshot>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// Current definition for `name`, or `None` for an unknown schema.
    pub fn lookup(&self, name: &str) -> Option<TypeDefinition> {
        self.current.load().get(name).cloned()
    }

    /// The live snapshot, for reading several names consistently.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Swap in `types` as the whole new snapshot.
    pub fn replace(&self, types: HashMap<String, TypeDefinition>) {
        let count = types.len();
        self.current.store(Arc::new(Snapshot::from(types)));
        debug!(types = count, "descriptor snapshot replaced");
    }

    /// Add or overwrite the entries of `types`, keeping every other entry.
    /// On a name collision the incoming definition wins.
    pub fn merge(&self, types: HashMap<String, TypeDefinition>) {
        if types.is_empty() {
            return;
        }
        loop {
            let cur = self.current.load_full();
            let mut next = Snapshot::clone(&cur);
            next.types
                .extend(types.iter().map(|(k, v)| (k.clone(), v.clone())));
            let total = next.len();
            let prev = self.current.compare_and_swap(&cur, Arc::new(next));
            if Arc::ptr_eq(&prev, &cur) {
                debug!(incoming = types.len(), total, "descriptor snapshot merged");
                return;
            }
        }
    }

    /// Returns the number of names in the live snapshot.
    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All known names, sorted.
    pub fn names(&self) -> Vec<String> {
        let snap = self.current.load();
        let mut names: Vec<String> = snap.names().map(str::to_string).collect();
        names.sort();
        names
    }
}

impl Default for DescriptorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DescriptorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorStore")
            .field("types", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::fixture::{descriptor_set, FieldSpec, FileBuilder, MessageBuilder};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn types(package: &str, names: &[&str]) -> HashMap<String, TypeDefinition> {
        let mut file = FileBuilder::new(&format!("{package}.proto")).package(package);
        for name in names {
            file = file.message(MessageBuilder::new(name));
        }
        decode(&descriptor_set(&[file])).unwrap()
    }

    #[test]
    fn starts_empty() {
        let store = DescriptorStore::new();
        assert!(store.is_empty());
        assert!(store.lookup("test.One").is_none());
    }

    #[test]
    fn merge_accumulates() {
        let store = DescriptorStore::new();
        store.merge(types("a", &["A"]));
        store.merge(types("b", &["B"]));
        assert!(store.lookup("a.A").is_some());
        assert!(store.lookup("b.B").is_some());
        assert_eq!(store.names(), vec!["a.A".to_string(), "b.B".to_string()]);
    }

    #[test]
    fn merge_overwrites_on_collision() {
        let store = DescriptorStore::new();
        let first = types("a", &["A"]);
        let second = types("a", &["A"]);
        let def_a2 = second["a.A"].clone();
        assert_ne!(first["a.A"], def_a2);

        store.merge(first);
        store.merge(second);
        assert_eq!(store.lookup("a.A").unwrap(), def_a2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replace_discards_previous_entries() {
        let store = DescriptorStore::new();
        store.merge(types("a", &["A"]));
        store.replace(types("b", &["B"]));
        assert!(store.lookup("a.A").is_none());
        assert!(store.lookup("b.B").is_some());
    }

    #[test]
    fn definitions_keep_resolving_after_their_payload_is_dropped() {
        let store = DescriptorStore::new();
        {
            let payload = descriptor_set(&[FileBuilder::new("x.proto").package("x")
                .message(MessageBuilder::new("Leaf"))
                .message(MessageBuilder::new("Root").field(FieldSpec::message("leaf", 1, ".x.Leaf")))]);
            store.merge(decode(&payload).unwrap());
        }
        let root = store.lookup("x.Root").unwrap();
        let leaf = root.field_by_number(1).unwrap().message_type().unwrap();
        assert_eq!(leaf, store.lookup("x.Leaf").unwrap());
    }

    #[test]
    fn concurrent_readers_never_see_torn_snapshot() {
        let names_a: Vec<String> = (0..50).map(|i| format!("A{i}")).collect();
        let names_b: Vec<String> = (0..50).map(|i| format!("B{i}")).collect();
        let refs_a: Vec<&str> = names_a.iter().map(String::as_str).collect();
        let refs_b: Vec<&str> = names_b.iter().map(String::as_str).collect();
        let set_a = types("snap", &refs_a);
        let set_b = types("snap", &refs_b);

        let store = Arc::new(DescriptorStore::new());
        store.replace(set_a.clone());
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut checks = 0usize;
                    while !stop.load(Ordering::Relaxed) {
                        let snap = store.snapshot();
                        let has_a = (0..50).all(|i| snap.contains(&format!("snap.A{i}")));
                        let has_b = (0..50).all(|i| snap.contains(&format!("snap.B{i}")));
                        let any_a = (0..50).any(|i| snap.contains(&format!("snap.A{i}")));
                        let any_b = (0..50).any(|i| snap.contains(&format!("snap.B{i}")));
                        assert_eq!(snap.len(), 50);
                        assert!((has_a && !any_b) || (has_b && !any_a), "torn snapshot");
                        checks += 1;
                    }
                    checks
                })
            })
            .collect();

        for i in 0..500 {
            if i % 2 == 0 {
                store.replace(set_b.clone());
            } else {
                store.replace(set_a.clone());
            }
        }
        stop.store(true, Ordering::Relaxed);
        for r in readers {
            assert!(r.join().unwrap() > 0);
        }
    }

    #[test]
    fn concurrent_merges_lose_nothing() {
        let store = Arc::new(DescriptorStore::new());
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..20 {
                        let pkg = format!("w{w}_{i}");
                        store.merge(types(&pkg, &["T"]));
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(store.len(), 160);
    }
}
