//! Catalog layer
//!
//! One vector layer: its store, its transaction table and the metrics and
//! log lines its operations produce.

use std::sync::Arc;

use serde_json::{json, Value};

use super::errors::{CatalogError, CatalogResult};
use super::LayerId;
use crate::geometry::GeometryType;
use crate::layer::{Fid, FieldDef, LayerDefinition};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::store::{ChangePage, LayerState, LayerStore};
use crate::txn::{CommitOutcome, TransactionCoordinator, TxnId};
use crate::versioning::{Epoch, VersionError, VersioningStatus, Vid};

pub struct Layer {
    id: LayerId,
    store: LayerStore,
    txns: TransactionCoordinator,
    metrics: Arc<MetricsRegistry>,
}

impl Layer {
    pub(super) fn new(id: LayerId, store: LayerStore, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            id,
            store,
            txns: TransactionCoordinator::new(),
            metrics,
        }
    }

    #[inline]
    pub fn id(&self) -> LayerId {
        self.id
    }

    fn log(&self, event: Event, extra: &[(&str, &str)]) {
        let id = self.id.to_string();
        let mut fields = vec![("layer", id.as_str())];
        fields.extend_from_slice(extra);
        log_event_with_fields(event, &fields);
    }

    /// Runs `f` against the committed state.
    pub fn read<T>(&self, f: impl FnOnce(&LayerState) -> T) -> CatalogResult<T> {
        Ok(self.store.read(f)?)
    }

    // ==================
    // Schema
    // ==================

    pub fn definition(&self) -> CatalogResult<LayerDefinition> {
        self.read(|s| s.definition().clone())
    }

    /// `{id, geometry_type, fields, versioning}`
    pub fn describe(&self) -> CatalogResult<Value> {
        let id = self.id;
        self.read(|s| {
            let definition = s.definition();
            json!({
                "id": id,
                "geometry_type": definition.geometry_type,
                "fields": definition.fields,
                "versioning": s.status(),
            })
        })
    }

    pub fn versioning(&self) -> CatalogResult<VersioningStatus> {
        self.read(|s| s.status())
    }

    /// Turns versioning on or off; asking for the current setting is a no-op.
    pub fn set_versioning(&self, enabled: bool) -> CatalogResult<VersioningStatus> {
        let status = self.store.modify(|s| -> Result<_, VersionError> {
            match (s.status().enabled, enabled) {
                (false, true) => s.enable_versioning(),
                (true, false) => s.disable_versioning(),
                _ => Ok(s.status()),
            }
        })?;
        let event = if status.enabled {
            Event::VersioningEnabled
        } else {
            Event::VersioningDisabled
        };
        let epoch = status.epoch.map(|e| e.to_string()).unwrap_or_default();
        self.log(event, &[("epoch", &epoch)]);
        Ok(status)
    }

    fn change_schema(
        &self,
        change: &str,
        f: impl FnOnce(&mut LayerState) -> Result<(), VersionError>,
    ) -> CatalogResult<LayerDefinition> {
        let definition = self.store.modify(|s| {
            f(s)?;
            Ok::<_, VersionError>(s.definition().clone())
        })?;
        self.log(Event::SchemaChanged, &[("change", change)]);
        Ok(definition)
    }

    pub fn add_fields(&self, fields: Vec<FieldDef>) -> CatalogResult<LayerDefinition> {
        self.change_schema("add_fields", |s| s.add_fields(fields))
    }

    pub fn delete_fields(&self, keynames: &[String]) -> CatalogResult<LayerDefinition> {
        self.change_schema("delete_fields", |s| s.delete_fields(keynames))
    }

    pub fn convert_geometry_type(&self, target: GeometryType) -> CatalogResult<LayerDefinition> {
        self.change_schema("geometry_type", |s| s.convert_geometry_type(target))
    }

    /// Removes every feature; a versioned layer restarts under a new epoch.
    pub fn truncate(&self) -> CatalogResult<VersioningStatus> {
        let status = self.store.modify(|s| {
            s.drop_storage();
            Ok::<_, VersionError>(s.status())
        })?;
        self.log(Event::SchemaChanged, &[("change", "truncate")]);
        Ok(status)
    }

    // ==================
    // Reads
    // ==================

    /// Features at `version`, or current ones.
    pub fn features(&self, version: Option<Vid>) -> CatalogResult<Vec<Value>> {
        Ok(self.read(|s| s.features_json(version))??)
    }

    pub fn feature(&self, fid: Fid) -> CatalogResult<Value> {
        self.read(|s| s.feature_json(fid))?
            .ok_or_else(|| VersionError::NotFound(format!("feature {}", fid)).into())
    }

    /// One page of the change feed, checked against the caller's epoch.
    pub fn changes(
        &self,
        epoch: Option<Epoch>,
        initial: Vid,
        target: Option<Vid>,
        cursor: Option<Fid>,
        limit: usize,
    ) -> CatalogResult<ChangePage> {
        let page = self.read(|s| {
            s.schema().check_epoch(epoch)?;
            s.changes(initial, target, cursor, limit)
        })??;
        Ok(page)
    }

    /// Reverts every store to its state at `target` in one new version.
    pub fn revert_to(&self, target: Vid) -> CatalogResult<(usize, Option<Vid>)> {
        let (changed, version) = self.store.write_scope(|s, ctx| s.revert_to(ctx, target))?;
        self.metrics.increment_reverts();
        let version_text = version.map(|v| v.to_string()).unwrap_or_default();
        self.log(
            Event::RevertApplied,
            &[
                ("target", &target.to_string()),
                ("changed", &changed.to_string()),
                ("version", &version_text),
            ],
        );
        Ok((changed, version))
    }

    // ==================
    // Transactions
    // ==================

    pub fn txn_open(&self, epoch: Option<Epoch>) -> CatalogResult<TxnId> {
        let id = self.txns.open(&self.store, epoch)?;
        self.metrics.increment_txns_opened();
        self.log(Event::TxnOpened, &[("txn", &id.to_string())]);
        Ok(id)
    }

    pub fn txn_put(&self, id: TxnId, items: Vec<(u64, Option<Value>)>) -> CatalogResult<()> {
        let count = items.len();
        let changed = self.txns.put(&self.store, id, items)?;
        self.metrics.add_operations_staged(count as u64);
        self.log(
            Event::TxnStaged,
            &[
                ("txn", &id.to_string()),
                ("slots", &count.to_string()),
                ("changed", if changed { "true" } else { "false" }),
            ],
        );
        Ok(())
    }

    pub fn txn_commit(&self, id: TxnId) -> CatalogResult<CommitOutcome> {
        let report = self.txns.commit(&self.store, id)?;
        if report.fresh {
            let txn = id.to_string();
            match &report.outcome {
                CommitOutcome::Committed { version } => {
                    self.metrics.record_commit(report.applied as u64);
                    let version = version.map(|v| v.to_string()).unwrap_or_default();
                    self.log(Event::TxnCommitted, &[("txn", &txn), ("version", &version)]);
                }
                CommitOutcome::Errors { errors } => {
                    self.metrics.increment_commits_rejected();
                    self.log(Event::TxnRejected, &[("txn", &txn), ("errors", &errors.len().to_string())]);
                }
            }
        }
        Ok(report.outcome)
    }

    pub fn txn_results(&self, id: TxnId) -> CatalogResult<Vec<(u64, Value)>> {
        Ok(self.txns.results(id)?)
    }

    pub fn txn_dispose(&self, id: TxnId) -> CatalogResult<()> {
        self.txns.dispose(id)?;
        self.log(Event::TxnDisposed, &[("txn", &id.to_string())]);
        Ok(())
    }

    /// Attachment content with its mime type.
    pub fn attachment_content(&self, aid: crate::extensions::Aid) -> CatalogResult<(String, Vec<u8>)> {
        self.read(|s| {
            let attachment = s.attachments().get(aid)?;
            let data = s.attachments().content(aid)?;
            Some((attachment.mime_type.clone(), data.to_vec()))
        })?
        .ok_or_else(|| CatalogError::Version(VersionError::NotFound(format!("attachment {}", aid))))
    }
}
