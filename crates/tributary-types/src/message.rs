//! Message model: [`Part`] and [`Batch`].
//!
//! A [`Part`] is one message: a byte payload, string metadata and a lazily
//! parsed JSON view of the payload. Parts are copy-on-write: the payload is a
//! reference-counted [`Bytes`] and the metadata map sits behind an [`Arc`],
//! so cloning is cheap and mutating a clone never touches the original.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;

/// A single message: payload bytes, metadata and a cached structured view.
#[derive(Clone, Default)]
pub struct Part {
    raw: Bytes,
    metadata: Arc<BTreeMap<String, String>>,
    structured: OnceLock<Arc<serde_json::Value>>,
}

impl Part {
    /// Create a part from raw payload bytes with empty metadata.
    #[must_use]
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self {
            raw: raw.into(),
            metadata: Arc::default(),
            structured: OnceLock::new(),
        }
    }

    /// Create a part by serialising a JSON value. The value is cached as the
    /// part's structured view.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialised.
    pub fn from_structured(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut part = Self::default();
        part.set_structured(value)?;
        Ok(part)
    }

    /// Borrow the payload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Cheap handle to the payload buffer.
    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.raw.clone()
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.raw.len()
    }

    /// Replace the payload. Invalidates the cached structured view.
    pub fn set_bytes(&mut self, raw: impl Into<Bytes>) {
        self.raw = raw.into();
        self.structured = OnceLock::new();
    }

    /// Structured (JSON) view of the payload, parsed on first access and
    /// cached until the payload changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON.
    pub fn structured(&self) -> Result<&serde_json::Value, serde_json::Error> {
        if let Some(value) = self.structured.get() {
            return Ok(value.as_ref());
        }
        let parsed: serde_json::Value = serde_json::from_slice(&self.raw)?;
        Ok(self.structured.get_or_init(|| Arc::new(parsed)).as_ref())
    }

    /// Replace the payload with the serialised form of `value`, keeping
    /// `value` as the cached structured view.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialised.
    pub fn set_structured(&mut self, value: serde_json::Value) -> Result<(), serde_json::Error> {
        let raw = serde_json::to_vec(&value)?;
        self.raw = Bytes::from(raw);
        let cache = OnceLock::new();
        let _ = cache.set(Arc::new(value));
        self.structured = cache;
        Ok(())
    }

    /// Look up a metadata value.
    #[must_use]
    pub fn metadata_get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Set a metadata value, copying the map first if it is shared.
    pub fn metadata_set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        Arc::make_mut(&mut self.metadata).insert(key.into(), value.into());
    }

    /// Remove a metadata key, returning its previous value.
    pub fn metadata_remove(&mut self, key: &str) -> Option<String> {
        if !self.metadata.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.metadata).remove(key)
    }

    /// Iterate metadata in key order.
    pub fn metadata_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl PartialEq for Part {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.metadata == other.metadata
    }
}

impl Eq for Part {}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("raw", &String::from_utf8_lossy(&self.raw))
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl From<&str> for Part {
    fn from(value: &str) -> Self {
        Self::new(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Part {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Vec<u8>> for Part {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

/// An ordered collection of parts. Length 1 is a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    parts: Vec<Part>,
}

impl Batch {
    /// Empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch from an existing list of parts.
    #[must_use]
    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    /// Batch with one part per payload.
    #[must_use]
    pub fn quick<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Part>,
    {
        Self {
            parts: payloads.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Part> {
        self.parts.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Part> {
        self.parts.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Part> {
        self.parts.iter_mut()
    }

    pub fn push(&mut self, part: Part) {
        self.parts.push(part);
    }

    /// Append all parts of `other`, preserving their order.
    pub fn extend(&mut self, other: Batch) {
        self.parts.extend(other.parts);
    }

    #[must_use]
    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }

    /// Sum of all payload sizes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.parts.iter().map(Part::byte_len).sum()
    }

    /// Copy of every payload, in order.
    #[must_use]
    pub fn all_bytes(&self) -> Vec<Vec<u8>> {
        self.parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }
}

impl FromIterator<Part> for Batch {
    fn from_iter<T: IntoIterator<Item = Part>>(iter: T) -> Self {
        Self {
            parts: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Batch {
    type Item = Part;
    type IntoIter = std::vec::IntoIter<Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Part;
    type IntoIter = std::slice::Iter<'a, Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}
