#![warn(missing_docs)]

//! # strato-apispec
//!
//! Flattened API specification snapshot for the Strato Code Mode gateway.
//!
//! The spec document is the queryable index of every upstream endpoint. It
//! lives in the V8 sandbox (not the LLM context window), enabling progressive
//! discovery without consuming tokens. A scheduled population job fetches the
//! upstream specification, resolves `$ref`s, tags each operation with its
//! product, and writes two blobs (`spec.json`, `products.json`) to the blob
//! store. The search sandbox embeds `spec.json` as `globalThis.spec`.

pub mod live;
pub mod store;

pub use live::LiveSpec;
pub use store::{BlobStore, DirBlobStore, StoreError, PRODUCTS_BLOB, SPEC_BLOB};

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

/// Resolve `$ref` pointers in a spec fragment against the full document.
///
/// Each `{"$ref": "#/path/to/node"}` object is replaced by the referenced
/// subtree, resolved recursively. A `$ref` encountered a second time on the
/// same resolution path is replaced with a circular-marker object instead of
/// recursing forever.
pub fn resolve_refs(fragment: &Value, full_spec: &Value) -> Value {
    let mut seen = BTreeSet::new();
    resolve_refs_inner(fragment, full_spec, &mut seen)
}

fn resolve_refs_inner(node: &Value, full_spec: &Value, seen: &mut BTreeSet<String>) -> Value {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                if !seen.insert(reference.clone()) {
                    return json!({ "$circular": reference });
                }
                let resolved = match lookup_pointer(full_spec, reference) {
                    Some(target) => resolve_refs_inner(target, full_spec, seen),
                    // Dangling ref: keep the node as-is so the defect is visible
                    None => node.clone(),
                };
                seen.remove(reference);
                return resolved;
            }
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), resolve_refs_inner(value, full_spec, seen));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_refs_inner(v, full_spec, seen))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Look up a `#/a/b/c` JSON pointer in the full document.
fn lookup_pointer<'a>(full_spec: &'a Value, reference: &str) -> Option<&'a Value> {
    let path = reference.strip_prefix("#/")?;
    let mut node = full_spec;
    for segment in path.split('/') {
        // JSON pointer escapes: ~1 is '/', ~0 is '~'
        let segment = segment.replace("~1", "/").replace("~0", "~");
        node = node.get(segment.as_str())?;
    }
    Some(node)
}

/// Path segments that never name a product.
const NON_PRODUCT_SEGMENTS: &[&str] = &[
    "client",
    "v4",
    "accounts",
    "zones",
    "memberships",
    "user",
    "graphql",
];

/// Infer the product name for an API path.
///
/// Skips versioning and scoping segments (`client`, `v4`, `accounts`,
/// `zones`, …) and `{param}` placeholders; the first remaining static
/// segment is the product. Returns `None` when no segment qualifies (e.g.
/// the GraphQL endpoint).
///
/// ```
/// use strato_apispec::extract_product;
/// assert_eq!(extract_product("/accounts/{account_id}/workers/scripts"), Some("workers".into()));
/// assert_eq!(extract_product("/zones/{zone_id}/dns_records"), Some("dns_records".into()));
/// assert_eq!(extract_product("/client/v4/graphql"), None);
/// ```
pub fn extract_product(path: &str) -> Option<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .find(|segment| {
            !segment.starts_with('{') && !NON_PRODUCT_SEGMENTS.contains(segment)
        })
        .map(|s| s.to_string())
}

/// Flatten a raw spec document: resolve every `$ref` under `paths` and tag
/// each operation with its inferred product.
///
/// Returns the flattened spec and the sorted list of distinct products.
pub fn flatten_spec(raw: &Value) -> (Value, Vec<String>) {
    let mut products: BTreeSet<String> = BTreeSet::new();
    let mut flattened = raw.clone();

    if let Some(paths) = raw.get("paths").and_then(|p| p.as_object()) {
        let mut out_paths = Map::with_capacity(paths.len());
        for (path, item) in paths {
            let mut resolved = resolve_refs(item, raw);
            let product = extract_product(path);
            if let (Some(product), Some(obj)) = (&product, resolved.as_object_mut()) {
                products.insert(product.clone());
                obj.insert("x-product".to_string(), Value::String(product.clone()));
            }
            out_paths.insert(path.clone(), resolved);
        }
        flattened["paths"] = Value::Object(out_paths);
        // Component schemas are inlined into paths; drop the originals to
        // keep the sandbox-embedded document small.
        if let Some(obj) = flattened.as_object_mut() {
            obj.remove("components");
        }
    }

    (flattened, products.into_iter().collect())
}
