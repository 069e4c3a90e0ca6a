//! Parse cache and structural differ
//!
//! Keeps the most recent successful parse per file and computes which
//! entities were added, modified, or removed between two parses. The byte
//! level change gate lives in [`crate::tracker`]; this module answers the
//! finer question of what actually changed structurally.

use std::collections::HashMap;

use crate::model::*;

/// Added / modified / removed lists for one entity kind.
#[derive(Debug, Clone)]
pub struct KindDelta<T> {
    pub added: Vec<T>,
    pub modified: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> Default for KindDelta<T> {
    fn default() -> Self {
        KindDelta {
            added: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<T> KindDelta<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

impl<T: Clone> KindDelta<T> {
    /// A delta for a first observation: everything is new.
    fn all_added(entities: &[T]) -> Self {
        KindDelta {
            added: entities.to_vec(),
            modified: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Diff two collections of one entity kind by identity key, then decide
/// modified-ness with the kind's structural equality rule.
fn diff_kind<T: EntityIdentity + Clone>(old: &[T], new: &[T]) -> KindDelta<T> {
    let old_map: HashMap<T::Key, &T> = old.iter().map(|e| (e.identity(), e)).collect();
    let new_keys: std::collections::HashSet<T::Key> =
        new.iter().map(|e| e.identity()).collect();

    let mut delta = KindDelta::default();
    for entity in new {
        match old_map.get(&entity.identity()) {
            Some(prior) if entity.same_shape(prior) => {}
            Some(_) => delta.modified.push(entity.clone()),
            None => delta.added.push(entity.clone()),
        }
    }
    for entity in old {
        if !new_keys.contains(&entity.identity()) {
            delta.removed.push(entity.clone());
        }
    }
    delta
}

/// The full delta between two parses of one file.
#[derive(Debug, Clone, Default)]
pub struct EntityDelta {
    pub file_path: String,
    pub functions: KindDelta<FunctionEntity>,
    pub imports: KindDelta<ImportEntity>,
    pub variables: KindDelta<VariableEntity>,
    pub types: KindDelta<TypeEntity>,
    pub interfaces: KindDelta<InterfaceEntity>,
    pub classes: KindDelta<ClassEntity>,
    pub constants: KindDelta<ConstantEntity>,
    pub jsx_elements: KindDelta<JsxElementEntity>,
    pub css_rules: KindDelta<CssRuleEntity>,
    pub function_calls: KindDelta<FunctionCallEntity>,
    pub type_usages: KindDelta<TypeUsageEntity>,
    pub extends: KindDelta<ExtendsEntity>,
    pub implements: KindDelta<ImplementsEntity>,
    pub references: KindDelta<ReferenceEntity>,
}

impl EntityDelta {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
            && self.imports.is_empty()
            && self.variables.is_empty()
            && self.types.is_empty()
            && self.interfaces.is_empty()
            && self.classes.is_empty()
            && self.constants.is_empty()
            && self.jsx_elements.is_empty()
            && self.css_rules.is_empty()
            && self.function_calls.is_empty()
            && self.type_usages.is_empty()
            && self.extends.is_empty()
            && self.implements.is_empty()
            && self.references.is_empty()
    }

    /// Total number of delta entries, used for log lines.
    pub fn len(&self) -> usize {
        self.functions.len()
            + self.imports.len()
            + self.variables.len()
            + self.types.len()
            + self.interfaces.len()
            + self.classes.len()
            + self.constants.len()
            + self.jsx_elements.len()
            + self.css_rules.len()
            + self.function_calls.len()
            + self.type_usages.len()
            + self.extends.len()
            + self.implements.len()
            + self.references.len()
    }
}

/// Per-file parse cache plus the diff computation over it.
///
/// Single writer: only the engine's processing path mutates the cache. The
/// cache is unbounded because it is keyed by tracked files, whose count is
/// bounded by the tree itself.
#[derive(Debug, Default)]
pub struct DeltaAnalyzer {
    cache: HashMap<String, ParsedFile>,
}

impl DeltaAnalyzer {
    pub fn new() -> Self {
        DeltaAnalyzer {
            cache: HashMap::new(),
        }
    }

    /// Compare `new_parse` with the cached parse for `path`.
    ///
    /// First observation of a path puts every entity in `added`. The cache
    /// is updated iff the delta is non-empty, so a structurally identical
    /// reparse leaves the cache untouched.
    pub fn analyze(&mut self, path: &str, new_parse: &ParsedFile) -> (EntityDelta, bool) {
        let Some(prior) = self.cache.get(path) else {
            let delta = EntityDelta {
                file_path: new_parse.file_path.clone(),
                functions: KindDelta::all_added(&new_parse.functions),
                imports: KindDelta::all_added(&new_parse.imports),
                variables: KindDelta::all_added(&new_parse.variables),
                types: KindDelta::all_added(&new_parse.types),
                interfaces: KindDelta::all_added(&new_parse.interfaces),
                classes: KindDelta::all_added(&new_parse.classes),
                constants: KindDelta::all_added(&new_parse.constants),
                jsx_elements: KindDelta::all_added(&new_parse.jsx_elements),
                css_rules: KindDelta::all_added(&new_parse.css_rules),
                function_calls: KindDelta::all_added(&new_parse.function_calls),
                type_usages: KindDelta::all_added(&new_parse.type_usages),
                extends: KindDelta::all_added(&new_parse.extends),
                implements: KindDelta::all_added(&new_parse.implements),
                references: KindDelta::all_added(&new_parse.references),
            };
            self.cache.insert(path.to_string(), new_parse.clone());
            return (delta, true);
        };

        let delta = EntityDelta {
            file_path: new_parse.file_path.clone(),
            functions: diff_kind(&prior.functions, &new_parse.functions),
            imports: diff_kind(&prior.imports, &new_parse.imports),
            variables: diff_kind(&prior.variables, &new_parse.variables),
            types: diff_kind(&prior.types, &new_parse.types),
            interfaces: diff_kind(&prior.interfaces, &new_parse.interfaces),
            classes: diff_kind(&prior.classes, &new_parse.classes),
            constants: diff_kind(&prior.constants, &new_parse.constants),
            jsx_elements: diff_kind(&prior.jsx_elements, &new_parse.jsx_elements),
            css_rules: diff_kind(&prior.css_rules, &new_parse.css_rules),
            function_calls: diff_kind(&prior.function_calls, &new_parse.function_calls),
            type_usages: diff_kind(&prior.type_usages, &new_parse.type_usages),
            extends: diff_kind(&prior.extends, &new_parse.extends),
            implements: diff_kind(&prior.implements, &new_parse.implements),
            references: diff_kind(&prior.references, &new_parse.references),
        };

        let has_changes = !delta.is_empty();
        if has_changes {
            self.cache.insert(path.to_string(), new_parse.clone());
        }
        (delta, has_changes)
    }

    /// Evict the cache entry for a removed file. Idempotent.
    pub fn drop_file(&mut self, path: &str) {
        self.cache.remove(path);
    }

    /// Number of cached parses.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
