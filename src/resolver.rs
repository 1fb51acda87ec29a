//! Reference resolution - expands `$ref` into the referenced subtree.
//!
//! One call to [`resolve_refs`] is one resolution pass. The pass owns its
//! caches: resolved targets keyed by `document#pointer`, and external
//! documents keyed by URL without fragment. Nothing survives the pass.
//!
//! Only schema-bearing keywords are traversed, so `$ref`-shaped data inside
//! `const`, `enum`, `default` or `examples` is left alone.
//!
//! A target whose own resolution leads back to itself is recursive. Every
//! reference to it stays a `$ref`, rewritten to a pointer into the result:
//! targets in the root document keep their place, targets in fetched
//! documents are copied into the root's definitions. This keeps the result
//! self-contained and makes a second pass reproduce the first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use serde_json::{Map, Value};
use url::Url;

use crate::loader::{document_key, Fetch};
use crate::pointer::{self, child_path};
use crate::types::{Draft, DEFINITION_KEYWORDS, SCHEMA_KEYWORDS, SCHEMA_LIST_KEYWORDS, SCHEMA_MAP_KEYWORDS};
use crate::validator::detect_draft;

/// Resolve every reachable `$ref` in `schema`.
///
/// Relative external references are joined against `base_uri`, falling back
/// to the schema's own absolute `$id`. Failures never abort the pass:
///
/// - an unfetchable or missing target leaves the `$ref` in place;
/// - a reference to a recursive target is left in place, pointing into the
///   result.
///
/// Callers treat a remaining unresolvable `$ref` as the empty schema. `$ref`
/// siblings are kept and win over keys copied from the target.
///
/// # Example
///
/// ```
/// # tokio_test_block(async {
/// use schema_form::{resolve_refs, NoFetch};
/// use serde_json::json;
///
/// let schema = json!({
///     "$defs": { "name": { "type": "string", "minLength": 1 } },
///     "properties": { "first": { "$ref": "#/$defs/name" } }
/// });
/// let resolved = resolve_refs(&schema, None, &NoFetch).await;
/// assert_eq!(resolved["properties"]["first"]["minLength"], 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
/// # }
/// ```
pub async fn resolve_refs<F: Fetch>(schema: &Value, base_uri: Option<&Url>, fetcher: &F) -> Value {
    let url = base_uri.cloned().or_else(|| {
        schema
            .get("$id")
            .and_then(Value::as_str)
            .and_then(|id| Url::parse(id).ok())
    });
    let root = Rc::new(Document {
        key: url.as_ref().map(document_key).unwrap_or_default(),
        url,
        root: schema.clone(),
    });
    let definitions = match detect_draft(schema) {
        Draft::Draft4 | Draft::Draft6 | Draft::Draft7 => "definitions",
        Draft::Draft2019 | Draft::Draft2020 => "$defs",
    };

    let mut pass = Pass {
        fetcher,
        root_key: root.key.clone(),
        definitions,
        documents: HashMap::new(),
        resolved: HashMap::new(),
        visiting: HashSet::new(),
        recursive: HashSet::new(),
        hoisted: BTreeMap::new(),
    };
    pass.documents
        .insert(root.key.clone(), DocumentState::Loaded(Rc::clone(&root)));

    let location = format!("{}#", root.key);
    pass.visiting.insert(location.clone());
    let mut resolved = pass.walk(&root.root, &root, String::new()).await;
    pass.visiting.remove(&location);

    pass.embed_hoisted(&mut resolved);
    resolved
}

/// A schema document taking part in a pass.
#[derive(Debug)]
struct Document {
    /// URL without fragment; empty for a root document without a base.
    key: String,
    url: Option<Url>,
    root: Value,
}

/// External document cache entry.
enum DocumentState {
    /// Fetch initiated, result not yet known.
    Pending,
    Loaded(Rc<Document>),
    Failed,
}

type Walk<'s> = Pin<Box<dyn Future<Output = Value> + 's>>;

/// Outcome of following one reference.
enum Target {
    Resolved(Value),
    /// Recursive target; the reference is kept, rewritten to this pointer.
    Recursive(String),
    Missing,
}

struct Pass<'f, F> {
    fetcher: &'f F,
    root_key: String,
    /// Definitions keyword of the root document's dialect.
    definitions: &'static str,
    documents: HashMap<String, DocumentState>,
    /// Resolved targets keyed by `document#pointer`.
    resolved: HashMap<String, Value>,
    /// Targets on the in-progress resolution chain.
    visiting: HashSet<String>,
    /// Targets whose resolution reached themselves.
    recursive: HashSet<String>,
    /// Definition name to location, for recursive targets in fetched documents.
    hoisted: BTreeMap<String, String>,
}

impl<F: Fetch> Pass<'_, F> {
    /// Resolve the schema `node` found at pointer `at` within `doc`.
    fn walk<'s>(&'s mut self, node: &'s Value, doc: &'s Rc<Document>, at: String) -> Walk<'s> {
        Box::pin(async move {
            let Value::Object(map) = node else {
                return node.clone();
            };
            if let Some(Value::String(reference)) = map.get("$ref") {
                return self.expand(map, reference, doc, &at).await;
            }

            let mut out = Map::new();
            for (key, value) in map {
                let resolved = self.walk_keyword(key, value, doc, &at).await;
                out.insert(key.clone(), resolved);
            }
            Value::Object(out)
        })
    }

    /// Resolve the value of one keyword; non-schema keywords are copied.
    async fn walk_keyword(&mut self, key: &str, value: &Value, doc: &Rc<Document>, at: &str) -> Value {
        let at = child_path(at, key);
        match (key, value) {
            (k, _) if SCHEMA_KEYWORDS.contains(&k) => self.walk(value, doc, at).await,
            ("items", Value::Array(list)) => self.walk_list(list, doc, &at).await,
            ("items", _) => self.walk(value, doc, at).await,
            (k, Value::Array(list)) if SCHEMA_LIST_KEYWORDS.contains(&k) => {
                self.walk_list(list, doc, &at).await
            }
            (k, Value::Object(entries)) if SCHEMA_MAP_KEYWORDS.contains(&k) => {
                let mut out = Map::new();
                for (name, entry) in entries {
                    // Legacy `dependencies` arrays are property lists, not schemas.
                    let resolved = match entry {
                        Value::Object(_) => self.walk(entry, doc, child_path(&at, name)).await,
                        _ => entry.clone(),
                    };
                    out.insert(name.clone(), resolved);
                }
                Value::Object(out)
            }
            (k, Value::Object(entries)) if DEFINITION_KEYWORDS.contains(&k) => {
                let mut out = Map::new();
                for (name, entry) in entries {
                    let entry_at = child_path(&at, name);
                    let resolved = match self.resolve_location(doc, &entry_at).await {
                        Some(resolved) => resolved,
                        None => self.walk(entry, doc, entry_at).await,
                    };
                    out.insert(name.clone(), resolved);
                }
                Value::Object(out)
            }
            _ => value.clone(),
        }
    }

    async fn walk_list(&mut self, list: &[Value], doc: &Rc<Document>, at: &str) -> Value {
        let mut out = Vec::with_capacity(list.len());
        for (i, item) in list.iter().enumerate() {
            out.push(self.walk(item, doc, child_path(at, &i.to_string())).await);
        }
        Value::Array(out)
    }

    /// Replace a `$ref` node with its target, keeping sibling keywords.
    async fn expand(&mut self, map: &Map<String, Value>, reference: &str, doc: &Rc<Document>, at: &str) -> Value {
        let mut siblings = Map::new();
        for (key, value) in map {
            if key != "$ref" {
                let resolved = self.walk_keyword(key, value, doc, at).await;
                siblings.insert(key.clone(), resolved);
            }
        }

        let kept = match self.resolve_ref(reference, doc).await {
            Target::Resolved(Value::Object(target)) => {
                for (key, value) in target {
                    siblings.entry(key).or_insert(value);
                }
                return Value::Object(siblings);
            }
            Target::Resolved(target @ Value::Bool(false)) => return target,
            Target::Resolved(target) if siblings.is_empty() => return target,
            Target::Resolved(_) => return Value::Object(siblings),
            Target::Recursive(pointer) => pointer,
            Target::Missing => self.rebase(reference, doc),
        };

        let mut out = Map::new();
        out.insert("$ref".into(), Value::String(kept));
        out.extend(siblings);
        Value::Object(out)
    }

    /// A reference left in place inside a fetched document is made absolute
    /// so it stays meaningful once spliced into another document.
    fn rebase(&self, reference: &str, doc: &Document) -> String {
        if doc.key == self.root_key {
            return reference.to_string();
        }
        match doc.url.as_ref().map(|base| base.join(reference)) {
            Some(Ok(absolute)) => absolute.to_string(),
            _ => reference.to_string(),
        }
    }

    async fn resolve_ref(&mut self, reference: &str, doc: &Rc<Document>) -> Target {
        let (url_part, fragment) = reference.split_once('#').unwrap_or((reference, ""));

        let target = if url_part.is_empty() {
            Rc::clone(doc)
        } else {
            let joined = match &doc.url {
                Some(base) => base.join(url_part),
                None => Url::parse(url_part),
            };
            let url = match joined {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(reference = %reference, error = %e, "cannot resolve reference URL");
                    return Target::Missing;
                }
            };
            let key = document_key(&url);
            if key == doc.key {
                Rc::clone(doc)
            } else {
                match self.document(key, url).await {
                    Some(target) => target,
                    None => return Target::Missing,
                }
            }
        };

        let pointer = if fragment.is_empty() || fragment.starts_with('/') {
            fragment.to_string()
        } else {
            match find_anchor(&target.root, fragment, "") {
                Some(pointer) => pointer,
                None => {
                    tracing::warn!(reference = %reference, "anchor not found");
                    return Target::Missing;
                }
            }
        };

        let location = format!("{}#{}", target.key, pointer);
        if self.visiting.contains(&location) {
            tracing::debug!(location = %location, "recursive reference left unexpanded");
            self.recursive.insert(location);
            return Target::Recursive(self.local_pointer(&target, &pointer));
        }
        match self.resolve_location(&target, &pointer).await {
            None => Target::Missing,
            Some(_) if self.recursive.contains(&location) => {
                Target::Recursive(self.local_pointer(&target, &pointer))
            }
            Some(resolved) => Target::Resolved(resolved),
        }
    }

    /// Pointer into the result where the resolved target at `pointer` in
    /// `doc` will live.
    fn local_pointer(&mut self, doc: &Document, pointer: &str) -> String {
        if doc.key == self.root_key {
            return format!("#{pointer}");
        }
        let location = format!("{}#{}", doc.key, pointer);
        let name = definition_name(&location);
        self.hoisted.insert(name.clone(), location);
        format!("#/{}/{}", self.definitions, name)
    }

    /// Copy recursive targets of fetched documents into the root's definitions.
    fn embed_hoisted(&self, resolved: &mut Value) {
        if self.hoisted.is_empty() {
            return;
        }
        let Value::Object(root) = resolved else {
            tracing::warn!("recursive external references cannot be embedded in a boolean root schema");
            return;
        };
        let definitions = root
            .entry(self.definitions)
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(definitions) = definitions else {
            return;
        };
        for (name, location) in &self.hoisted {
            if let Some(schema) = self.resolved.get(location) {
                tracing::debug!(location = %location, name = %name, "embedding recursive external schema");
                definitions
                    .entry(name.clone())
                    .or_insert_with(|| schema.clone());
            }
        }
    }

    /// Resolve the subtree at `pointer` in `doc`, through the target cache.
    async fn resolve_location(&mut self, doc: &Rc<Document>, pointer: &str) -> Option<Value> {
        let location = format!("{}#{}", doc.key, pointer);
        if self.visiting.contains(&location) {
            return None;
        }
        if let Some(resolved) = self.resolved.get(&location) {
            tracing::debug!(location = %location, "reference cache hit");
            return Some(resolved.clone());
        }
        let Some(raw) = pointer::resolve(&doc.root, pointer) else {
            tracing::warn!(location = %location, "reference target not found");
            return None;
        };

        self.visiting.insert(location.clone());
        let resolved = self.walk(raw, doc, pointer.to_string()).await;
        self.visiting.remove(&location);

        self.resolved.insert(location, resolved.clone());
        Some(resolved)
    }

    /// Fetch an external document once per pass.
    async fn document(&mut self, key: String, url: Url) -> Option<Rc<Document>> {
        match self.documents.get(&key) {
            Some(DocumentState::Loaded(doc)) => return Some(Rc::clone(doc)),
            Some(DocumentState::Failed) => return None,
            Some(DocumentState::Pending) => {
                tracing::debug!(url = %url, "fetch already in flight");
                return None;
            }
            None => {}
        }

        let mut url = url;
        url.set_fragment(None);
        self.documents.insert(key.clone(), DocumentState::Pending);
        tracing::debug!(url = %url, "fetching external schema");

        match self.fetcher.fetch(&url).await {
            Ok(root) => {
                let doc = Rc::new(Document {
                    key: key.clone(),
                    url: Some(url),
                    root,
                });
                self.documents
                    .insert(key, DocumentState::Loaded(Rc::clone(&doc)));
                Some(doc)
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "failed to fetch external schema");
                self.documents.insert(key, DocumentState::Failed);
                None
            }
        }
    }
}

/// Definition name for a location: URL and pointer characters outside
/// `[A-Za-z0-9._-]` become `_`, so the name needs no escaping in a fragment.
fn definition_name(location: &str) -> String {
    let name: String = location
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '-' => c,
            _ => '_',
        })
        .collect();
    name.trim_end_matches('_').to_string()
}

/// Pointer to the subschema declaring plain-name anchor `name`, via
/// `$anchor` or a fragment-only `$id`/`id`.
fn find_anchor(node: &Value, name: &str, at: &str) -> Option<String> {
    match node {
        Value::Object(map) => {
            let by_anchor = map.get("$anchor").and_then(Value::as_str) == Some(name);
            let by_id = ["$id", "id"].iter().any(|key| {
                map.get(*key)
                    .and_then(Value::as_str)
                    .and_then(|id| id.strip_prefix('#'))
                    == Some(name)
            });
            if by_anchor || by_id {
                return Some(at.to_string());
            }
            map.iter()
                .find_map(|(key, child)| find_anchor(child, name, &child_path(at, key)))
        }
        Value::Array(list) => list
            .iter()
            .enumerate()
            .find_map(|(i, child)| find_anchor(child, name, &child_path(at, &i.to_string()))),
        _ => None,
    }
}
