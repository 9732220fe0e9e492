//! Given-name equivalence classes.
//!
//! The store is a union-find over normalized given names. Classes only ever
//! merge; nothing is split or forgotten for the life of the store.

use std::collections::HashMap;
use std::sync::RwLock;

/// Regional spelling variants treated as one name out of the box.
const DEFAULT_CLASSES: &[&[&str]] = &[
    &["Juho", "Johan", "Juhana", "Johannes", "Jussi"],
    &["Matti", "Matts", "Mattias", "Matias"],
    &["Maria", "Maija", "Marja", "Maja"],
    &["Jaakko", "Jakob", "Jacob"],
    &["Antti", "Anders", "Andreas"],
    &["Heikki", "Henrik", "Henric"],
    &["Erkki", "Erik", "Eric"],
    &["Mikko", "Mikael", "Michel"],
    &["Tuomas", "Thomas", "Tomas"],
    &["Yrjö", "Georg", "Göran"],
    &["Pietari", "Petter", "Per", "Pehr"],
    &["Liisa", "Elisabet", "Lisa", "Lisbeta"],
    &["Kaarina", "Karin", "Katariina", "Katarina", "Kaisa"],
    &["Margareta", "Marketta", "Kreeta", "Greta"],
    &["Brita", "Priita", "Briita"],
    &["Kristiina", "Stiina", "Kristina"],
    &["Sofia", "Sohvi"],
    &["Elias", "Eljas"],
    &["Abraham", "Aapo"],
    &["Israel", "Iisakki", "Isak"],
];

/// Lowercases and folds the diacritics found in the register's names.
pub fn fold_name(raw: &str) -> String {
    raw.trim()
        .trim_end_matches('.')
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'ä' | 'å' | 'á' | 'à' | 'â' => 'a',
            'ö' | 'ø' | 'ó' | 'ò' | 'ô' => 'o',
            'ü' | 'ú' | 'ù' => 'u',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' => 'i',
            other => other,
        })
        .collect()
}

/// The given name of a printed name: its first word, without patronymic or
/// clan suffix (`Matti Juhonp. Korpi` → `matti`).
pub fn given_name_key(raw: &str) -> Option<String> {
    let first = raw.split_whitespace().next()?;
    let key = fold_name(first);
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

#[derive(Debug, Default)]
struct DisjointSet {
    index: HashMap<String, usize>,
    names: Vec<String>,
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn intern(&mut self, key: &str) -> usize {
        if let Some(&i) = self.index.get(key) {
            return i;
        }
        let i = self.parent.len();
        self.index.insert(key.to_string(), i);
        self.names.push(key.to_string());
        self.parent.push(i);
        self.rank.push(0);
        i
    }

    /// Root lookup without path compression, usable under a read lock.
    fn root(&self, mut i: usize) -> usize {
        while self.parent[i] != i {
            i = self.parent[i];
        }
        i
    }

    fn find_compress(&mut self, i: usize) -> usize {
        let root = self.root(i);
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Merges the classes of `a` and `b`. Returns `false` when they were
    /// already one class.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find_compress(a);
        let rb = self.find_compress(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}

/// Shared store of given-name equivalence classes.
///
/// Reads take a shared lock; `learn` takes the exclusive lock. Because merging
/// is commutative and associative, concurrent learners always converge on the
/// same classes.
#[derive(Debug, Default)]
pub struct NameEquivalenceStore {
    sets: RwLock<DisjointSet>,
}

impl NameEquivalenceStore {
    /// An empty store: every name is equivalent only to itself.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with the built-in regional variants.
    pub fn with_defaults() -> Self {
        let store = Self::new();
        for class in DEFAULT_CLASSES {
            store.learn_class(class.iter().copied());
        }
        store
    }

    /// Merges every name in `names` into one class.
    pub fn learn_class<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let mut iter = names.into_iter();
        let Some(first) = iter.next() else {
            return;
        };
        for other in iter {
            self.learn(first, other);
        }
    }

    /// True when the two names are identical after folding, or belong to the
    /// same known class.
    pub fn are_equivalent(&self, a: &str, b: &str) -> bool {
        let (Some(ka), Some(kb)) = (given_name_key(a), given_name_key(b)) else {
            return false;
        };
        if ka == kb {
            return true;
        }
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        match (sets.index.get(&ka), sets.index.get(&kb)) {
            (Some(&ia), Some(&ib)) => sets.root(ia) == sets.root(ib),
            _ => false,
        }
    }

    /// Merges the classes of `a` and `b`. Idempotent; returns `true` only when
    /// the call actually joined two distinct classes.
    pub fn learn(&self, a: &str, b: &str) -> bool {
        let (Some(ka), Some(kb)) = (given_name_key(a), given_name_key(b)) else {
            return false;
        };
        if ka == kb {
            return false;
        }
        let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
        let ia = sets.intern(&ka);
        let ib = sets.intern(&kb);
        sets.union(ia, ib)
    }

    /// All known classes with more than one member, each sorted, in a stable
    /// order.
    pub fn classes(&self) -> Vec<Vec<String>> {
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        let mut groups: HashMap<usize, Vec<String>> = HashMap::new();
        for (i, name) in sets.names.iter().enumerate() {
            groups.entry(sets.root(i)).or_default().push(name.clone());
        }
        let mut out: Vec<Vec<String>> = groups
            .into_values()
            .filter(|g| g.len() > 1)
            .map(|mut g| {
                g.sort();
                g
            })
            .collect();
        out.sort();
        out
    }
}
