//! Triples, vocabularies and indexed triple stores.
//!
//! Triple files hold one fact per line as three whitespace-separated tokens:
//!
//! ```text
//! Einstein    won         NobelPrize
//! Einstein    bornIn      Ulm
//! ```
//!
//! Tokens become dense integer ids in first-occurrence order. Entities and
//! relations have separate id spaces. A [`Vocabulary`] is shared by the
//! train/valid/test splits of a [`Dataset`] so the same token always maps to
//! the same id.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DataConfig;
use crate::error::{Error, Result};

/// Mapping file names written next to a trained model.
pub const ENTITY_MAPPINGS_FILE: &str = "entityMappings.csv";
/// See [`ENTITY_MAPPINGS_FILE`].
pub const RELATION_MAPPINGS_FILE: &str = "relationMappings.csv";

/// A (subject, relation, object) fact over integer ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    /// Subject entity id.
    pub subject: usize,
    /// Relation id.
    pub relation: usize,
    /// Object entity id.
    pub object: usize,
}

impl Triple {
    /// Create a triple.
    pub const fn new(subject: usize, relation: usize, object: usize) -> Self {
        Self {
            subject,
            relation,
            object,
        }
    }

    /// Same triple with the subject replaced.
    pub const fn with_subject(self, subject: usize) -> Self {
        Self { subject, ..self }
    }

    /// Same triple with the object replaced.
    pub const fn with_object(self, object: usize) -> Self {
        Self { object, ..self }
    }
}

/// What to do with tokens that are not yet in the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewTokenPolicy {
    /// Give the token the next free id.
    Assign,
    /// Drop the whole triple.
    Skip,
}

// =============================================================================
// Vocabulary
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Interner {
    ids: HashMap<String, usize>,
    names: Vec<String>,
}

impl Interner {
    fn get(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    fn intern(&mut self, name: &str) -> usize {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len();
        self.ids.insert(name.to_string(), id);
        self.names.push(name.to_string());
        id
    }

    fn name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    fn len(&self) -> usize {
        self.names.len()
    }

    fn dump(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        for (id, name) in self.names.iter().enumerate() {
            writer.write_record([name.as_str(), &id.to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        let mut entries = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            let parse_error = |message: String| Error::Parse {
                path: path.to_path_buf(),
                line: index + 1,
                message,
            };
            if record.len() != 2 {
                return Err(parse_error(format!(
                    "expected `name,id`, found {} fields",
                    record.len()
                )));
            }
            let id: usize = record[1]
                .trim()
                .parse()
                .map_err(|e| parse_error(format!("bad id {:?}: {e}", &record[1])))?;
            entries.push((id, record[0].to_string()));
        }
        entries.sort_unstable_by_key(|(id, _)| *id);

        let mut interner = Self::default();
        for (expected, (id, name)) in entries.into_iter().enumerate() {
            if id != expected {
                return Err(Error::Config(format!(
                    "{}: ids must be dense from 0, missing id {expected}",
                    path.display()
                )));
            }
            if interner.intern(&name) != id {
                return Err(Error::Config(format!(
                    "{}: {name:?} is mapped to more than one id",
                    path.display()
                )));
            }
        }
        Ok(interner)
    }
}

/// Token to id mappings for entities and relations.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    entities: Interner,
    relations: Interner,
}

impl Vocabulary {
    /// Create an empty vocabulary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct entities (N).
    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    /// Number of distinct relations (K).
    pub fn num_relations(&self) -> usize {
        self.relations.len()
    }

    /// Id of an entity token.
    pub fn entity_id(&self, name: &str) -> Option<usize> {
        self.entities.get(name)
    }

    /// Id of a relation token.
    pub fn relation_id(&self, name: &str) -> Option<usize> {
        self.relations.get(name)
    }

    /// Token for an entity id.
    pub fn entity_name(&self, id: usize) -> Option<&str> {
        self.entities.name(id)
    }

    /// Token for a relation id.
    pub fn relation_name(&self, id: usize) -> Option<&str> {
        self.relations.name(id)
    }

    /// Id of an entity token, assigning a new id if unseen.
    pub fn intern_entity(&mut self, name: &str) -> usize {
        self.entities.intern(name)
    }

    /// Id of a relation token, assigning a new id if unseen.
    pub fn intern_relation(&mut self, name: &str) -> usize {
        self.relations.intern(name)
    }

    /// Resolve three tokens to a triple under `policy`.
    ///
    /// Returns `None` when the policy is [`NewTokenPolicy::Skip`] and any
    /// token is unknown.
    pub fn resolve(
        &mut self,
        subject: &str,
        relation: &str,
        object: &str,
        policy: NewTokenPolicy,
    ) -> Option<Triple> {
        match policy {
            NewTokenPolicy::Assign => Some(Triple::new(
                self.intern_entity(subject),
                self.intern_relation(relation),
                self.intern_entity(object),
            )),
            NewTokenPolicy::Skip => Some(Triple::new(
                self.entity_id(subject)?,
                self.relation_id(relation)?,
                self.entity_id(object)?,
            )),
        }
    }

    /// Write `entityMappings.csv` and `relationMappings.csv` into `dir`.
    pub fn dump_mappings(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        self.entities.dump(&dir.join(ENTITY_MAPPINGS_FILE))?;
        self.relations.dump(&dir.join(RELATION_MAPPINGS_FILE))?;
        Ok(())
    }

    /// Read mappings previously written by [`Vocabulary::dump_mappings`].
    pub fn load_mappings(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            entities: Interner::load(&dir.join(ENTITY_MAPPINGS_FILE))?,
            relations: Interner::load(&dir.join(RELATION_MAPPINGS_FILE))?,
        })
    }
}

// =============================================================================
// TripleStore
// =============================================================================

#[derive(Debug, Clone, Default)]
struct CandidatePool {
    ids: Vec<usize>,
    members: HashSet<usize>,
}

impl CandidatePool {
    fn insert(&mut self, id: usize) {
        if self.members.insert(id) {
            self.ids.push(id);
        }
    }
}

/// An indexed, read-mostly list of triples.
///
/// Besides the triples themselves (in file order, duplicates kept) the store
/// indexes:
/// - a hash set for O(1) membership tests,
/// - the distinct subjects and objects seen with each relation, which form
///   the typed candidate pools for corruption sampling.
///
/// `num_entities`/`num_relations` bound every id the store contains.
#[derive(Debug, Clone, Default)]
pub struct TripleStore {
    triples: Vec<Triple>,
    known: HashSet<Triple>,
    subjects: HashMap<usize, CandidatePool>,
    objects: HashMap<usize, CandidatePool>,
    num_entities: usize,
    num_relations: usize,
}

impl TripleStore {
    /// Create an empty store over `num_entities` entities and `num_relations` relations.
    pub fn new(num_entities: usize, num_relations: usize) -> Self {
        Self {
            num_entities,
            num_relations,
            ..Self::default()
        }
    }

    /// Build a store from triples; the id bounds grow to cover every triple.
    pub fn from_triples(
        triples: impl IntoIterator<Item = Triple>,
        num_entities: usize,
        num_relations: usize,
    ) -> Self {
        let mut store = Self::new(num_entities, num_relations);
        for triple in triples {
            store.push(triple);
        }
        store
    }

    /// Load a triple file, resolving tokens through `vocabulary`.
    ///
    /// `limit` caps the number of accepted triples. Lines that do not hold
    /// exactly three tokens are an error; blank lines are skipped.
    pub fn load(
        path: impl AsRef<Path>,
        vocabulary: &mut Vocabulary,
        policy: NewTokenPolicy,
        limit: Option<usize>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))
        })?;
        Self::read(BufReader::new(file), path, vocabulary, policy, limit)
    }

    /// Read triples from any buffered reader. `path` is only used in errors.
    pub fn read<R: BufRead>(
        reader: R,
        path: &Path,
        vocabulary: &mut Vocabulary,
        policy: NewTokenPolicy,
        limit: Option<usize>,
    ) -> Result<Self> {
        let mut store = Self::default();
        let mut skipped = 0usize;

        for (index, line) in reader.lines().enumerate() {
            if limit.is_some_and(|limit| store.len() >= limit) {
                break;
            }
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let [subject, relation, object] = tokens.as_slice() else {
                return Err(Error::Parse {
                    path: path.to_path_buf(),
                    line: index + 1,
                    message: format!("expected 3 tokens, found {}", tokens.len()),
                });
            };
            match vocabulary.resolve(subject, relation, object, policy) {
                Some(triple) => store.push(triple),
                None => skipped += 1,
            }
        }

        store.set_bounds(vocabulary.num_entities(), vocabulary.num_relations());
        if skipped > 0 {
            warn!(
                path = %path.display(),
                skipped,
                "skipped triples with unknown entities or relations"
            );
        }
        info!(path = %path.display(), triples = store.len(), "loaded triples");
        Ok(store)
    }

    /// Append a triple and index it.
    pub fn push(&mut self, triple: Triple) {
        self.num_entities = self
            .num_entities
            .max(triple.subject.max(triple.object) + 1);
        self.num_relations = self.num_relations.max(triple.relation + 1);
        self.triples.push(triple);
        self.known.insert(triple);
        self.subjects
            .entry(triple.relation)
            .or_default()
            .insert(triple.subject);
        self.objects
            .entry(triple.relation)
            .or_default()
            .insert(triple.object);
    }

    /// Append every triple of `other` (e.g. training on validation data).
    pub fn extend(&mut self, other: &TripleStore) {
        for &triple in &other.triples {
            self.push(triple);
        }
        self.set_bounds(other.num_entities, other.num_relations);
    }

    /// Raise the id bounds (never lowers them).
    pub fn set_bounds(&mut self, num_entities: usize, num_relations: usize) {
        self.num_entities = self.num_entities.max(num_entities);
        self.num_relations = self.num_relations.max(num_relations);
    }

    /// Number of triples, duplicates included.
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    /// Whether the store holds no triples.
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// All triples in load order.
    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Triple at position `index`.
    pub fn get(&self, index: usize) -> Option<&Triple> {
        self.triples.get(index)
    }

    /// Iterate over triples in load order.
    pub fn iter(&self) -> std::slice::Iter<'_, Triple> {
        self.triples.iter()
    }

    /// Whether the exact triple is present.
    pub fn contains(&self, triple: &Triple) -> bool {
        self.known.contains(triple)
    }

    /// Distinct subjects seen with `relation`, in first-occurrence order.
    pub fn subjects_for(&self, relation: usize) -> &[usize] {
        self.subjects
            .get(&relation)
            .map(|pool| pool.ids.as_slice())
            .unwrap_or(&[])
    }

    /// Distinct objects seen with `relation`, in first-occurrence order.
    pub fn objects_for(&self, relation: usize) -> &[usize] {
        self.objects
            .get(&relation)
            .map(|pool| pool.ids.as_slice())
            .unwrap_or(&[])
    }

    /// Entity id bound (N).
    pub fn num_entities(&self) -> usize {
        self.num_entities
    }

    /// Relation id bound (K).
    pub fn num_relations(&self) -> usize {
        self.num_relations
    }
}

impl<'a> IntoIterator for &'a TripleStore {
    type Item = &'a Triple;
    type IntoIter = std::slice::Iter<'a, Triple>;

    fn into_iter(self) -> Self::IntoIter {
        self.triples.iter()
    }
}

// =============================================================================
// Dataset
// =============================================================================

/// Train/valid/test splits over one shared vocabulary.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Token mappings shared by every split.
    pub vocabulary: Vocabulary,
    /// Training triples.
    pub train: TripleStore,
    /// Validation triples.
    pub valid: TripleStore,
    /// Test triples.
    pub test: TripleStore,
}

impl Dataset {
    /// Load the three splits named in `config`.
    ///
    /// The training split always assigns new ids; validation and test skip
    /// triples with unseen tokens when `ignoreNewConstituents` is set. After
    /// loading, every split's id bounds equal the final vocabulary size.
    pub fn load(config: &DataConfig) -> Result<Self> {
        let mut vocabulary = if config.load_mappings {
            let location = config.location.as_deref().unwrap_or(config.dir.as_path());
            let vocabulary = Vocabulary::load_mappings(location)?;
            info!(
                location = %location.display(),
                entities = vocabulary.num_entities(),
                relations = vocabulary.num_relations(),
                "loaded id mappings"
            );
            vocabulary
        } else {
            Vocabulary::new()
        };

        let held_out_policy = if config.ignore_new_constituents {
            NewTokenPolicy::Skip
        } else {
            NewTokenPolicy::Assign
        };

        let train = TripleStore::load(
            config.dir.join(&config.train_file),
            &mut vocabulary,
            NewTokenPolicy::Assign,
            config.limit,
        )?;
        let valid = TripleStore::load(
            config.dir.join(&config.valid_file),
            &mut vocabulary,
            held_out_policy,
            config.limit,
        )?;
        let test = TripleStore::load(
            config.dir.join(&config.test_file),
            &mut vocabulary,
            held_out_policy,
            config.limit,
        )?;

        Ok(Self::from_splits(vocabulary, train, valid, test))
    }

    /// Assemble a dataset from already built splits, aligning their bounds.
    pub fn from_splits(
        vocabulary: Vocabulary,
        mut train: TripleStore,
        mut valid: TripleStore,
        mut test: TripleStore,
    ) -> Self {
        let n = vocabulary
            .num_entities()
            .max(train.num_entities())
            .max(valid.num_entities())
            .max(test.num_entities());
        let k = vocabulary
            .num_relations()
            .max(train.num_relations())
            .max(valid.num_relations())
            .max(test.num_relations());
        for store in [&mut train, &mut valid, &mut test] {
            store.set_bounds(n, k);
        }
        Self {
            vocabulary,
            train,
            valid,
            test,
        }
    }

    /// Entity count across all splits.
    pub fn num_entities(&self) -> usize {
        self.train.num_entities()
    }

    /// Relation count across all splits.
    pub fn num_relations(&self) -> usize {
        self.train.num_relations()
    }
}
