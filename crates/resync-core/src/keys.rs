//! Cache key derivation.
//!
//! Every [`CacheKey`] is built from a [`ResourceIdentity`] by the functions in
//! this module; there is no other way to obtain one. Keys are deterministic:
//! parameter maps are sorted by key (recursively) and null values are dropped
//! before serialization, so two parameter sets with the same entries always
//! produce the same key regardless of insertion order.
//!
//! Keys render like query keys always have:
//!
//! ```text
//! ["todos"]                         all
//! ["todos","list"]                  list, no params
//! ["todos","list","{\"page\":1}"]   list with params
//! ["todos","detail","42"]           detail
//! ["todos","stats"]                 custom
//! ["todos","priority","high"]       custom with a sub-scope
//! ```

use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The kind segment of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// The bare collection key.
    All,
    List,
    Detail,
    /// Resource-specific keys such as `stats` or `priority`.
    Custom(String),
}

impl KeyKind {
    /// Kind for a named segment. `list` and `detail` are never custom.
    pub fn named(name: &str) -> Self {
        match name {
            "list" => KeyKind::List,
            "detail" => KeyKind::Detail,
            other => KeyKind::Custom(other.to_string()),
        }
    }

    fn segment(&self) -> Option<&str> {
        match self {
            KeyKind::All => None,
            KeyKind::List => Some("list"),
            KeyKind::Detail => Some("detail"),
            KeyKind::Custom(name) => Some(name.as_str()),
        }
    }
}

/// What a cache key identifies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    pub collection: String,
    pub kind: KeyKind,
    /// Entity id for detail keys; sub-scope for list and custom keys.
    pub id: Option<String>,
    /// Canonical parameters: sorted by key, nulls removed.
    pub params: Vec<(String, Value)>,
}

/// Opaque, deterministic cache identity.
#[derive(Clone)]
pub struct CacheKey {
    identity: Arc<ResourceIdentity>,
    rendered: Arc<str>,
}

impl CacheKey {
    fn from_identity(identity: ResourceIdentity) -> Self {
        let rendered = render(&identity);
        Self {
            identity: Arc::new(identity),
            rendered: rendered.into(),
        }
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    pub fn collection(&self) -> &str {
        &self.identity.collection
    }

    pub fn kind(&self) -> &KeyKind {
        &self.identity.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.identity.id.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rendered.hash(state);
    }
}

impl PartialOrd for CacheKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rendered.cmp(&other.rendered)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.rendered)
    }
}

/// Invalidation target: a collection, optionally narrowed to one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefix {
    collection: String,
    kind: Option<KeyKind>,
}

impl KeyPrefix {
    /// Every key of a collection.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            kind: None,
        }
    }

    /// Every key of one kind within a collection.
    pub fn kind(collection: impl Into<String>, kind: KeyKind) -> Self {
        Self {
            collection: collection.into(),
            kind: Some(kind),
        }
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        if key.collection() != self.collection {
            return false;
        }
        match &self.kind {
            None => true,
            Some(kind) => key.kind().segment() == kind.segment(),
        }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref().and_then(KeyKind::segment) {
            Some(segment) => write!(f, "[{:?},{:?},..]", self.collection, segment),
            None => write!(f, "[{:?},..]", self.collection),
        }
    }
}

/// Derive a key from a collection name and optional parameters.
///
/// - no parameters (or only nulls): the bare collection key
/// - exactly `{ id }`: the detail key for that id
/// - anything else: a list key carrying the parameters
pub fn make_key(collection: &str, params: Option<&Map<String, Value>>) -> CacheKey {
    let params = params.map(canonical_params).unwrap_or_default();

    if params.is_empty() {
        return all(collection);
    }
    if let [(name, value)] = params.as_slice() {
        if name == "id" {
            return detail(collection, &scalar_text(value));
        }
    }

    CacheKey::from_identity(ResourceIdentity {
        collection: collection.to_string(),
        kind: KeyKind::List,
        id: None,
        params,
    })
}

/// The bare collection key.
pub fn all(collection: &str) -> CacheKey {
    CacheKey::from_identity(ResourceIdentity {
        collection: collection.to_string(),
        kind: KeyKind::All,
        id: None,
        params: Vec::new(),
    })
}

/// A list key; `None` or empty parameters give the plain list key.
pub fn list(collection: &str, params: Option<&Map<String, Value>>) -> CacheKey {
    CacheKey::from_identity(ResourceIdentity {
        collection: collection.to_string(),
        kind: KeyKind::List,
        id: None,
        params: params.map(canonical_params).unwrap_or_default(),
    })
}

/// A list key with a sub-scope, such as infinite pages.
pub fn scoped_list(collection: &str, scope: &str, params: Option<&Map<String, Value>>) -> CacheKey {
    CacheKey::from_identity(ResourceIdentity {
        collection: collection.to_string(),
        kind: KeyKind::List,
        id: Some(scope.to_string()),
        params: params.map(canonical_params).unwrap_or_default(),
    })
}

pub fn detail(collection: &str, id: &str) -> CacheKey {
    CacheKey::from_identity(ResourceIdentity {
        collection: collection.to_string(),
        kind: KeyKind::Detail,
        id: Some(id.to_string()),
        params: Vec::new(),
    })
}

/// A resource-specific key, e.g. `custom("todos", "priority", Some("high"))`.
///
/// The names `list` and `detail` yield list and detail keys.
pub fn custom(collection: &str, name: &str, scope: Option<&str>) -> CacheKey {
    CacheKey::from_identity(ResourceIdentity {
        collection: collection.to_string(),
        kind: KeyKind::named(name),
        id: scope.map(str::to_string),
        params: Vec::new(),
    })
}

/// Key family for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFamily {
    collection: &'static str,
}

impl KeyFamily {
    pub const fn new(collection: &'static str) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }

    pub fn all(&self) -> CacheKey {
        all(self.collection)
    }

    pub fn everything(&self) -> KeyPrefix {
        KeyPrefix::collection(self.collection)
    }

    pub fn lists(&self) -> KeyPrefix {
        KeyPrefix::kind(self.collection, KeyKind::List)
    }

    pub fn list(&self, params: Option<&Map<String, Value>>) -> CacheKey {
        list(self.collection, params)
    }

    pub fn details(&self) -> KeyPrefix {
        KeyPrefix::kind(self.collection, KeyKind::Detail)
    }

    pub fn detail(&self, id: &str) -> CacheKey {
        detail(self.collection, id)
    }

    pub fn custom(&self, name: &str, scope: Option<&str>) -> CacheKey {
        custom(self.collection, name, scope)
    }
}

/// Sort, drop nulls. Keys are unique because they come from a map.
fn canonical_params(params: &Map<String, Value>) -> Vec<(String, Value)> {
    let mut pairs: Vec<(String, Value)> = params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render(identity: &ResourceIdentity) -> String {
    let mut segments: Vec<String> = vec![identity.collection.clone()];
    if let Some(segment) = identity.kind.segment() {
        segments.push(segment.to_string());
    }
    if let Some(id) = &identity.id {
        segments.push(id.clone());
    }
    if !identity.params.is_empty() {
        let mut object = String::from("{");
        for (i, (key, value)) in identity.params.iter().enumerate() {
            if i > 0 {
                object.push(',');
            }
            object.push_str(&Value::String(key.clone()).to_string());
            object.push(':');
            write_canonical(value, &mut object);
        }
        object.push('}');
        segments.push(object);
    }

    let quoted: Vec<String> = segments
        .into_iter()
        .map(|s| Value::String(s).to_string())
        .collect();
    format!("[{}]", quoted.join(","))
}

/// Serialize with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
