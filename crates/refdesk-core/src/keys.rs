//! Canonical cache keys and owner tags.
//!
//! A [`CanonicalKey`] is a deterministic serialization of one query's full
//! parameter set: a route-family prefix plus `name=value` pairs sorted by
//! name, with every value percent-encoded. Two value-equal parameter sets
//! produce byte-identical keys no matter what order the caller supplied the
//! parameters in, and no value can smuggle a `=` or `&` that would make two
//! distinct parameter sets collide. Keys are compared by equality only; no
//! hashing is involved, so there are no hash collisions to reason about.
//!
//! An [`OwnerTag`] names the entity a cache entry belongs to (`user:17`,
//! `paper:42`). Tags are attached to entries at insertion time and matched
//! by whole-value equality during invalidation, never by substring scanning
//! of the serialized key.

use std::fmt;

/// A deterministic, order-independent fingerprint of a query's parameters.
///
/// Built with [`KeyBuilder`]; the inner string is stable across processes
/// and suitable for logging.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accumulates named parameters for one [`CanonicalKey`].
///
/// Parameter names are code-supplied identifiers and are written verbatim;
/// values go through [`urlencoding::encode`]. `None` values are skipped, so
/// an absent filter and a filter never supplied serialize identically.
#[derive(Debug)]
pub struct KeyBuilder {
    route: String,
    params: Vec<(String, String)>,
}

impl KeyBuilder {
    /// Start a key for the given route family (e.g. `papers.search`).
    pub fn new(route: &str) -> Self {
        Self {
            route: route.to_string(),
            params: Vec::new(),
        }
    }

    /// Add one named parameter.
    pub fn param(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    /// Add a parameter only if the value is present.
    pub fn opt_param(mut self, name: &str, value: Option<impl fmt::Display>) -> Self {
        if let Some(value) = value {
            self = self.param(name, value);
        }
        self
    }

    /// Sort parameters by name and serialize.
    pub fn build(mut self) -> CanonicalKey {
        self.params.sort_by(|a, b| a.0.cmp(&b.0));
        let mut out = self.route;
        for (i, (name, value)) in self.params.iter().enumerate() {
            out.push(if i == 0 { '?' } else { '&' });
            out.push_str(name);
            out.push('=');
            out.push_str(&urlencoding::encode(value));
        }
        CanonicalKey(out)
    }
}

/// The entity a cache entry belongs to, as a `kind:id` pair.
///
/// Invalidation matches tags by whole-value equality, so `user:1` never
/// matches entries tagged `user:12`.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub struct OwnerTag(String);

impl OwnerTag {
    /// Tag for everything owned by or aggregated for one user.
    pub fn user(id: u64) -> Self {
        Self(format!("user:{id}"))
    }

    /// Tag for everything derived from one paper's row.
    pub fn paper(id: u64) -> Self {
        Self(format!("paper:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
