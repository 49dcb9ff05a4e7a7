// Entity Models - identity tables keyed by the extract's natural keys
//
// Each entity:
// - is created the first time its key is seen
// - is never updated afterwards (first write wins)
// - survives concurrent creation: a UNIQUE conflict means "re-query"

pub mod brand;
pub mod location;
pub mod provider;

pub use brand::Brand;
pub use location::Location;
pub use provider::Provider;

use crate::db::is_constraint_violation;
use crate::error::{ImportError, Result};
use tracing::debug;

/// Outcome of a get-or-create
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    /// Already stored; the stored value is returned unchanged
    Existing(T),
    Created(T),
}

impl<T> Resolved<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Resolved::Created(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Resolved::Existing(v) | Resolved::Created(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Resolved::Existing(v) | Resolved::Created(v) => v,
        }
    }
}

/// Shared get-or-create flow.
///
/// `find` is tried first; on a miss `insert` runs. A constraint violation on
/// insert means another writer got there first, so `find` runs once more and
/// a second miss is an unresolved conflict.
pub(crate) fn get_or_create<T, F, I>(
    entity: &'static str,
    key: &str,
    find: F,
    insert: I,
) -> Result<Resolved<T>>
where
    F: Fn() -> Result<Option<T>>,
    I: FnOnce() -> rusqlite::Result<T>,
{
    if let Some(existing) = find()? {
        return Ok(Resolved::Existing(existing));
    }

    match insert() {
        Ok(created) => Ok(Resolved::Created(created)),
        Err(e) if is_constraint_violation(&e) => {
            debug!("{} '{}' conflicted on insert, re-querying: {}", entity, key, e);
            find()?
                .map(Resolved::Existing)
                .ok_or_else(|| ImportError::UnresolvedConflict {
                    entity,
                    key: key.to_string(),
                })
        }
        Err(e) => Err(e.into()),
    }
}
