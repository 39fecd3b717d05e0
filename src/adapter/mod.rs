//! Uniform fetch/create/update over SRC-R and SRC-S (§4.5, component table
//! row "RemoteStoreAdapter (×2)").

pub mod relational;
pub mod sheet;

use crate::error::SyncResult;
use crate::models::{EntityKind, LoadCarRow, Record};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// The contract both remote stores are driven through. `EntitySyncer` only
/// ever talks to this trait, never to `RelationalAdapter`/`SheetAdapter`
/// directly, except for the two relational-only operations (`load_cars` rows
/// and `sync_run` bookkeeping) that have no sheet-side analogue (§4.4, §4.7).
#[async_trait]
pub trait RemoteStoreAdapter: Send + Sync {
    /// Fetches every record of one entity kind, normalized into the flat
    /// `Record` shape (§3, §4.5).
    async fn fetch_all(&self, entity: EntityKind) -> SyncResult<Vec<Record>>;

    /// Creates a record. If `payload` already carries an `id` key (§4.6.d:
    /// "accept the engine-assigned id if the source already referenced
    /// one"), an adapter that supports client-assigned primary keys (the
    /// relational side) honors it instead of generating a fresh one.
    async fn create(&self, entity: EntityKind, payload: Map<String, Value>) -> SyncResult<Record>;

    /// Updates the record identified by `id` (the adapter's own id space:
    /// relational UUID or sheet record-id).
    async fn update(&self, entity: EntityKind, id: &str, payload: Map<String, Value>) -> SyncResult<Record>;
}

/// The one relational-only read `EntitySyncer` needs with no sheet-side
/// analogue: `load_cars` join rows (§4.4). Kept separate from
/// `RemoteStoreAdapter` rather than bolted onto it, since no sheet adapter
/// could ever implement it.
#[async_trait]
pub trait LoadCarsSource: Send + Sync {
    async fn fetch_load_cars(&self) -> SyncResult<Vec<LoadCarRow>>;
}
