//! Snapshot port — load and save persisted item state.

use std::future::Future;

use itemhub_domain::error::HubError;
use itemhub_domain::item::PersistedItem;

/// Stores the `{name, value, changed, checked}` records of every item.
///
/// Saving replaces the previous snapshot as a whole.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, items: &[PersistedItem]) -> impl Future<Output = Result<(), HubError>> + Send;

    fn load(&self) -> impl Future<Output = Result<Vec<PersistedItem>, HubError>> + Send;
}

impl<T: SnapshotStore> SnapshotStore for std::sync::Arc<T> {
    fn save(&self, items: &[PersistedItem]) -> impl Future<Output = Result<(), HubError>> + Send {
        (**self).save(items)
    }

    fn load(&self) -> impl Future<Output = Result<Vec<PersistedItem>, HubError>> + Send {
        (**self).load()
    }
}
