//! Snapshot types for the mirrored entity kinds.

pub mod decimal;
pub mod pair;
pub mod token;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

pub use pair::{PairGroup, PairPatch, PairSnapshot};
pub use token::{TokenGroup, TokenPatch, TokenSnapshot};

/// Category of mirrored domain object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Pair,
    Token,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Pair => "pair",
            EntityKind::Token => "token",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed enumeration of independently refreshed field subsets of one entity kind.
pub trait FieldGroup: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn all() -> &'static [Self];

    fn name(&self) -> &'static str;

    /// Group backing a top-level field, `None` for identifiers and unmirrored fields.
    fn of_field(field: &str) -> Option<Self>;
}

/// A flattened value object stored per id in the entity store.
pub trait EntitySnapshot:
    Clone + Serialize + DeserializeOwned + Send + Sync + fmt::Debug + 'static
{
    type Group: FieldGroup;
    type Patch: Clone + Send + Sync + fmt::Debug + 'static;

    fn empty(id: &str) -> Self;

    fn id(&self) -> &str;

    fn patch_group(patch: &Self::Patch) -> Self::Group;

    fn apply_patch(&mut self, patch: Self::Patch);
}
