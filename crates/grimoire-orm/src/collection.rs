//! Array-like result container.

use std::ops::{Deref, DerefMut};

use crate::bone::Bone;
use crate::error::Result;

/// A result set of entities.
///
/// Dereferences to `Vec<Bone>`, so the whole slice/vec surface is
/// available; `to_json`/`to_object` and `save` iterate the members.
#[derive(Debug, Default)]
pub struct Collection(Vec<Bone>);

impl Collection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes every member, omitting null attributes.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.0.iter().map(Bone::to_json).collect())
    }

    /// Serializes every member, including null attributes.
    #[must_use]
    pub fn to_object(&self) -> serde_json::Value {
        serde_json::Value::Array(self.0.iter().map(Bone::to_object).collect())
    }

    /// Persists every changed member sequentially and returns how many
    /// were saved.
    pub async fn save(&mut self) -> Result<u64> {
        let mut saved = 0;
        for bone in &mut self.0 {
            if bone.is_new() || bone.changed() {
                bone.save().await?;
                saved += 1;
            }
        }
        Ok(saved)
    }
}

impl Deref for Collection {
    type Target = Vec<Bone>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Collection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl IntoIterator for Collection {
    type Item = Bone;
    type IntoIter = std::vec::IntoIter<Bone>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Bone> for Collection {
    fn from_iter<I: IntoIterator<Item = Bone>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<Bone>> for Collection {
    fn from(bones: Vec<Bone>) -> Self {
        Self(bones)
    }
}
