use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::CacheError;

/// A single positional component of a [`CacheKey`].
///
/// Components form an explicit tagged tree instead of dispatching on runtime
/// types: callers build the shape they want, and rendering is deterministic.
///
/// Unordered collections have no canonical ordering here. A set rendered
/// through a `List` serializes in the order it was passed in, so callers who
/// want set-equality across differently ordered inputs must sort the elements
/// themselves before building the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    /// A scalar value, rendered as its text form.
    Scalar(String),
    /// An ordered sequence, rendered as `[e1,e2,…]`.
    List(Vec<Component>),
    /// A mapping, rendered as `{k1=v1,k2=v2,…}` in iteration order.
    Map(Vec<(Component, Component)>),
}

impl Component {
    fn render(&self, out: &mut String) {
        match self {
            Component::Scalar(value) => out.push_str(value),
            Component::List(elements) => {
                out.push('[');
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    element.render(out);
                }
                out.push(']');
            }
            Component::Map(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    key.render(out);
                    out.push('=');
                    value.render(out);
                }
                out.push('}');
            }
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out);
        f.write_str(&out)
    }
}

macro_rules! impl_scalar_component {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Component {
                fn from(value: $ty) -> Self {
                    Component::Scalar(value.to_string())
                }
            }
        )+
    };
}

impl_scalar_component!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, bool, char, &str, String,
);

impl<C: Into<Component>> From<Vec<C>> for Component {
    fn from(elements: Vec<C>) -> Self {
        Component::List(elements.into_iter().map(Into::into).collect())
    }
}

/// A structural cache key: a key-space name, a data model version, and zero
/// or more positional components.
///
/// The name distinguishes key spaces sharing a cache region; the version
/// distinguishes revisions of the cached data model, so bumping it
/// invalidates every entry under the key space.
///
/// The serialized form is computed once at construction and is what defines
/// identity: two keys are equal iff they serialize equally, and hashing is
/// consistent with that. The cache region is deliberately *not* part of the
/// serialized form, it is composed into the storage key by the provider.
#[derive(Debug, Clone)]
pub struct CacheKey {
    name: Option<String>,
    version: u32,
    components: Vec<Component>,
    serialized: String,
}

impl CacheKey {
    /// Creates a key from a key-space name, a version, and its components.
    ///
    /// Serializes as `c1:c2:…-{name}-v{version}`, or `{name}-v{version}`
    /// without components. Fails if the name is empty.
    pub fn new(
        name: impl Into<String>,
        version: u32,
        components: Vec<Component>,
    ) -> Result<Self, CacheError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CacheError::InvalidArgument(
                "the name of the key space is mandatory".into(),
            ));
        }

        Ok(Self::build(Some(name), version, components))
    }

    /// Creates a key for a key space holding a single entry.
    ///
    /// Serializes as `{name}-v{version}`.
    pub fn singleton(name: impl Into<String>, version: u32) -> Result<Self, CacheError> {
        Self::new(name, version, Vec::new())
    }

    /// Creates a key from a single scalar value, like an id.
    ///
    /// Serializes as `{value}-v{version}`.
    pub fn mono(value: impl Into<Component>, version: u32) -> Result<Self, CacheError> {
        let value = scalar(value.into())?;
        Ok(Self::build(None, version, vec![value]))
    }

    /// Creates a [`mono`](Self::mono) key carrying a key-space name.
    ///
    /// Serializes as `{value}-{name}-v{version}`. Fails if the name is empty.
    pub fn mono_named(
        value: impl Into<Component>,
        name: impl Into<String>,
        version: u32,
    ) -> Result<Self, CacheError> {
        let value = scalar(value.into())?;
        Self::new(name, version, vec![value])
    }

    fn build(name: Option<String>, version: u32, components: Vec<Component>) -> Self {
        let mut serialized = String::with_capacity(64);
        for (i, component) in components.iter().enumerate() {
            if i > 0 {
                serialized.push(':');
            }
            component.render(&mut serialized);
        }
        if let Some(name) = &name {
            if !serialized.is_empty() {
                serialized.push('-');
            }
            serialized.push_str(name);
        }
        serialized.push_str("-v");
        serialized.push_str(&version.to_string());

        Self {
            name,
            version,
            components,
            serialized,
        }
    }

    /// The stable text form of this key.
    pub fn serialize(&self) -> &str {
        &self.serialized
    }

    /// The name of the key space, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The version of the data model related to this key.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The positional components of this key.
    pub fn components(&self) -> &[Component] {
        &self.components
    }
}

fn scalar(component: Component) -> Result<Component, CacheError> {
    match component {
        Component::Scalar(_) => Ok(component),
        other => Err(CacheError::InvalidArgument(format!(
            "a mono key requires a scalar component, got {other:?}"
        ))),
    }
}

// Identity is defined on the serialized form, which keeps equality, ordering,
// hashing and serialization consistent with each other by construction.

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.serialized == other.serialized
    }
}

impl Eq for CacheKey {}

impl PartialOrd for CacheKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

/// A reusable factory for [`CacheKey`]s sharing a name and version.
///
/// The builder is cheap to clone and safe to share, so it can be stored once
/// per key space and used to mint keys from values:
///
/// ```
/// use autocache::KeyBuilder;
///
/// let users = KeyBuilder::new("user", 1).unwrap();
/// let key = users.build(vec![42.into()]);
/// assert_eq!(key.serialize(), "42-user-v1");
/// ```
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    name: String,
    version: u32,
}

impl KeyBuilder {
    /// Creates a builder for the given key space. Fails if the name is empty.
    pub fn new(name: impl Into<String>, version: u32) -> Result<Self, CacheError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CacheError::InvalidArgument(
                "the name of the key space is mandatory".into(),
            ));
        }

        Ok(Self { name, version })
    }

    /// Creates a key with the given components.
    pub fn build(&self, components: Vec<Component>) -> CacheKey {
        CacheKey::build(Some(self.name.clone()), self.version, components)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    fn hash_of(key: &CacheKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_simple_key_serialization() {
        let key = CacheKey::new("user", 1, vec![42.into()]).unwrap();
        assert_eq!(key.serialize(), "42-user-v1");

        let key = CacheKey::new("user", 1, vec![42.into(), "it".into()]).unwrap();
        assert_eq!(key.serialize(), "42:it-user-v1");

        let key = CacheKey::new("user", 3, Vec::new()).unwrap();
        assert_eq!(key.serialize(), "user-v3");
    }

    #[test]
    fn test_singleton_key_serialization() {
        let key = CacheKey::singleton("prices", 2).unwrap();
        assert_eq!(key.serialize(), "prices-v2");
    }

    #[test]
    fn test_mono_key_serialization() {
        let key = CacheKey::mono(42, 1).unwrap();
        assert_eq!(key.serialize(), "42-v1");

        let key = CacheKey::mono_named(42, "user", 1).unwrap();
        assert_eq!(key.serialize(), "42-user-v1");
    }

    #[test]
    fn test_collection_components() {
        let key = CacheKey::new(
            "report",
            1,
            vec![Component::List(vec![1.into(), 2.into(), 3.into()])],
        )
        .unwrap();
        assert_eq!(key.serialize(), "[1,2,3]-report-v1");

        let key = CacheKey::new(
            "report",
            1,
            vec![Component::Map(vec![
                ("country".into(), "it".into()),
                ("year".into(), 2016.into()),
            ])],
        )
        .unwrap();
        assert_eq!(key.serialize(), "{country=it,year=2016}-report-v1");

        // nested shapes render recursively
        let key = CacheKey::new(
            "report",
            1,
            vec![Component::List(vec![
                Component::List(vec![1.into(), 2.into()]),
                3.into(),
            ])],
        )
        .unwrap();
        assert_eq!(key.serialize(), "[[1,2],3]-report-v1");
    }

    #[test]
    fn test_empty_name_is_rejected() {
        assert!(CacheKey::new("", 1, vec![42.into()]).is_err());
        assert!(CacheKey::singleton("", 1).is_err());
        assert!(CacheKey::mono_named(42, "", 1).is_err());
        assert!(KeyBuilder::new("", 1).is_err());
    }

    #[test]
    fn test_mono_key_requires_a_scalar() {
        let list = Component::List(vec![1.into(), 2.into()]);
        assert!(CacheKey::mono(list, 1).is_err());
    }

    #[test]
    fn test_equality_is_consistent_with_serialization_and_hash() {
        let a = CacheKey::new("user", 1, vec![42.into()]).unwrap();
        let b = CacheKey::new("user", 1, vec![42.into()]).unwrap();
        let c = CacheKey::new("user", 2, vec![42.into()]).unwrap();
        let d = CacheKey::new("account", 1, vec![42.into()]).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.serialize(), b.serialize());
        assert_eq!(hash_of(&a), hash_of(&b));

        assert_ne!(a, c);
        assert_ne!(a.serialize(), c.serialize());

        assert_ne!(a, d);
        assert_ne!(a.serialize(), d.serialize());

        // a mono key with the same shape is the same key
        let mono = CacheKey::mono_named(42, "user", 1).unwrap();
        assert_eq!(a, mono);
        assert_eq!(hash_of(&a), hash_of(&mono));
    }

    #[test]
    fn test_version_bump_invalidates_the_key_space() {
        let builder_v1 = KeyBuilder::new("user", 1).unwrap();
        let builder_v2 = KeyBuilder::new("user", 2).unwrap();

        assert_ne!(
            builder_v1.build(vec![42.into()]),
            builder_v2.build(vec![42.into()])
        );
    }

    #[test]
    fn test_builder_builds_simple_keys() {
        let builder = KeyBuilder::new("user", 1).unwrap();

        assert_eq!(builder.build(vec![42.into()]).serialize(), "42-user-v1");
        assert_eq!(builder.build(Vec::new()).serialize(), "user-v1");
        assert_eq!(
            builder.build(vec![42.into()]),
            CacheKey::new("user", 1, vec![42.into()]).unwrap()
        );
    }
}
