//! In-memory workflow registry.
//!
//! Holds every known [`WorkflowDefinition`] keyed by id, in insertion order.
//! The registry is a dumb store: it does not validate the prerequisite graph
//! (cycles are the resolver's problem) and a re-insert replaces the previous
//! definition wholesale.

use std::path::Path;

use flowpilot_types::WorkflowDefinition;
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::parser::parse_definition_file;

/// Extensions `load_dir` considers definition sources.
const DEFINITION_EXTENSIONS: [&str; 5] = ["json", "yaml", "yml", "md", "txt"];

#[derive(Debug, Default)]
pub struct Registry {
    definitions: IndexMap<String, WorkflowDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition. Re-inserting an id replaces the old record
    /// and keeps its position in the listing order.
    pub fn insert(&mut self, definition: WorkflowDefinition) {
        self.definitions.insert(definition.id.clone(), definition);
    }

    /// Registers every definition from the iterator.
    pub fn load_all(&mut self, definitions: impl IntoIterator<Item = WorkflowDefinition>) {
        for definition in definitions {
            self.insert(definition);
        }
    }

    /// Loads every recognizable definition file in a directory.
    ///
    /// A file that fails to parse is logged and skipped; it never poisons
    /// the rest of the directory. Returns the number of definitions loaded.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, EngineError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| EngineError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut loaded = 0;
        let mut paths: Vec<_> = entries.filter_map(|entry| entry.ok().map(|e| e.path())).collect();
        paths.sort();
        for path in paths {
            let recognized = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| DEFINITION_EXTENSIONS.contains(&ext));
            if !path.is_file() || !recognized {
                continue;
            }
            match parse_definition_file(&path) {
                Ok(definition) => {
                    self.insert(definition);
                    loaded += 1;
                }
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping unparseable definition");
                }
            }
        }
        info!(dir = %dir.display(), loaded, "loaded workflow definitions");
        Ok(loaded)
    }

    pub fn get(&self, id: &str) -> Result<&WorkflowDefinition, EngineError> {
        self.definitions.get(id).ok_or_else(|| EngineError::UnknownWorkflow(id.to_string()))
    }

    /// Mandatory prerequisite ids of a workflow, in authoring order.
    pub fn prerequisites_of(&self, id: &str) -> Result<&[String], EngineError> {
        self.get(id).map(|definition| definition.prerequisites.as_slice())
    }

    /// All definitions in insertion order.
    pub fn list_all(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.definitions.values()
    }

    /// Distinct categories, first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = Vec::new();
        for definition in self.definitions.values() {
            if !categories.contains(&definition.category.as_str()) {
                categories.push(definition.category.as_str());
            }
        }
        categories
    }

    /// Ranks definitions against a free-text query, optionally restricted to
    /// one category. Exact substring hits on the name or id outrank
    /// word-overlap hits on the description; zero-score entries are dropped.
    pub fn search(&self, query: &str, category: Option<&str>) -> Vec<&WorkflowDefinition> {
        let query_lower = query.to_ascii_lowercase();
        let query_words: Vec<&str> = query_lower.split_whitespace().collect();

        let mut scored: Vec<(i32, usize, &WorkflowDefinition)> = self
            .definitions
            .values()
            .enumerate()
            .filter(|(_, definition)| category.map_or(true, |c| definition.category.eq_ignore_ascii_case(c)))
            .filter_map(|(position, definition)| {
                let score = relevance_score(definition, &query_lower, &query_words);
                (score > 0).then_some((score, position, definition))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.into_iter().map(|(_, _, definition)| definition).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn relevance_score(definition: &WorkflowDefinition, query_lower: &str, query_words: &[&str]) -> i32 {
    let name_lower = definition.name.to_ascii_lowercase();
    let description_lower = definition.description.to_ascii_lowercase();

    let mut score = 0;
    if definition.id.to_ascii_lowercase().contains(query_lower) {
        score += 10;
    }
    if name_lower.contains(query_lower) {
        score += 10;
    }
    if description_lower.contains(query_lower) {
        score += 5;
    }
    for word in query_words {
        if name_lower.split_whitespace().any(|w| w == *word) {
            score += 2;
        }
        if description_lower.split_whitespace().any(|w| w == *word) {
            score += 1;
        }
    }
    score
}
