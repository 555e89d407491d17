//! Layer store
//!
//! Owns one layer's state behind a lock. Every write runs on a scratch copy
//! of the committed state; the copy replaces the committed state only after
//! its invariants hold and it has been persisted, so a failed write leaves
//! nothing behind.

mod feed;
mod state;

use std::sync::{Arc, RwLock};

pub use feed::ChangePage;
pub use state::LayerState;

use crate::versioning::{VersionContext, VersionError, VersionResult, Vid};

/// Durable destination for committed layer state.
pub trait SnapshotSink: Send + Sync {
    fn persist(&self, state: &LayerState) -> VersionResult<()>;
}

fn poisoned() -> VersionError {
    VersionError::Storage("layer lock poisoned".to_string())
}

pub struct LayerStore {
    state: RwLock<LayerState>,
    sink: Option<Arc<dyn SnapshotSink>>,
}

impl LayerStore {
    pub fn new(state: LayerState) -> Self {
        Self {
            state: RwLock::new(state),
            sink: None,
        }
    }

    pub fn with_sink(state: LayerState, sink: Arc<dyn SnapshotSink>) -> Self {
        Self {
            state: RwLock::new(state),
            sink: Some(sink),
        }
    }

    /// Runs `f` against the committed state.
    pub fn read<T>(&self, f: impl FnOnce(&LayerState) -> T) -> VersionResult<T> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(f(&state))
    }

    /// Runs `f` on a scratch copy and commits the copy if `f` succeeds.
    pub fn modify<T, E>(&self, f: impl FnOnce(&mut LayerState) -> Result<T, E>) -> Result<T, E>
    where
        E: From<VersionError>,
    {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let mut scratch = state.clone();
        let out = f(&mut scratch)?;
        self.commit_scratch(&mut state, scratch)?;
        Ok(out)
    }

    /// Runs `f` inside one new version.
    ///
    /// Returns the output of `f` and the version current afterwards. On a
    /// versioned layer the scratch copy is dropped and latest stays put when
    /// the writes of `f` have no net effect on any store.
    pub fn write_scope<T, E>(
        &self,
        f: impl FnOnce(&mut LayerState, &mut VersionContext) -> Result<T, E>,
    ) -> Result<(T, Option<Vid>), E>
    where
        E: From<VersionError>,
    {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let latest = state.status().latest;
        let mut scratch = state.clone();
        let mut ctx = scratch.begin_version();
        let out = f(&mut scratch, &mut ctx)?;
        if let (Some(latest), Some(vid)) = (latest, ctx.vid()) {
            if ctx.changed() == 0 || !scratch.has_net_change(latest, vid) {
                return Ok((out, Some(latest)));
            }
        }
        let vid = scratch.finish_version(&ctx)?;
        self.commit_scratch(&mut state, scratch)?;
        Ok((out, vid))
    }

    fn commit_scratch(&self, committed: &mut LayerState, scratch: LayerState) -> VersionResult<()> {
        scratch.check_invariants()?;
        if let Some(sink) = &self.sink {
            sink.persist(&scratch)?;
        }
        *committed = scratch;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::geometry::GeometryType;
    use crate::layer::{FeatureRow, Fid, LayerDefinition};

    fn state() -> LayerState {
        let definition = LayerDefinition::new(GeometryType::Point, vec![]).unwrap();
        let mut state = LayerState::new(definition).unwrap();
        state.enable_versioning().unwrap();
        state
    }

    #[derive(Default)]
    struct CountingSink {
        persisted: Mutex<Vec<usize>>,
    }

    impl SnapshotSink for CountingSink {
        fn persist(&self, state: &LayerState) -> VersionResult<()> {
            self.persisted
                .lock()
                .unwrap()
                .push(state.schema().feature_count());
            Ok(())
        }
    }

    struct FailingSink;

    impl SnapshotSink for FailingSink {
        fn persist(&self, _state: &LayerState) -> VersionResult<()> {
            Err(VersionError::Storage("disk full".to_string()))
        }
    }

    #[test]
    fn test_write_scope_advances_version() {
        let store = LayerStore::new(state());
        let (fid, vid) = store
            .write_scope(|s, ctx| s.create_feature(ctx, FeatureRow::default()))
            .unwrap();
        assert_eq!(fid, Fid::new(1));
        assert_eq!(vid, Some(Vid::new(2)));
    }

    #[test]
    fn test_failed_scope_leaves_state_untouched() {
        let store = LayerStore::new(state());
        let result = store.write_scope(|s, ctx| {
            s.create_feature(ctx, FeatureRow::default())?;
            s.delete_feature(ctx, Fid::new(7), None)
        });
        assert!(matches!(result, Err(VersionError::NotFound(_))));
        let (count, latest) = store
            .read(|s| (s.schema().feature_count(), s.status().latest))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(latest, Some(Vid::new(1)));
    }

    #[test]
    fn test_sink_sees_each_commit() {
        let sink = Arc::new(CountingSink::default());
        let store = LayerStore::with_sink(state(), sink.clone());
        store
            .write_scope(|s, ctx| s.create_feature(ctx, FeatureRow::default()))
            .unwrap();
        store
            .write_scope(|s, ctx| s.create_feature(ctx, FeatureRow::default()))
            .unwrap();
        assert_eq!(*sink.persisted.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_noop_scope_skips_sink() {
        let sink = Arc::new(CountingSink::default());
        let store = LayerStore::with_sink(state(), sink.clone());
        let (_, vid) = store.write_scope(|_, _| Ok::<_, VersionError>(())).unwrap();
        assert_eq!(vid, Some(Vid::new(1)));
        assert!(sink.persisted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancelling_writes_keep_latest() {
        let sink = Arc::new(CountingSink::default());
        let store = LayerStore::with_sink(state(), sink.clone());
        let (_, vid) = store
            .write_scope(|s, ctx| {
                let fid = s.create_feature(ctx, FeatureRow::default())?;
                s.delete_feature(ctx, fid, None)
            })
            .unwrap();
        assert_eq!(vid, Some(Vid::new(1)));
        assert!(sink.persisted.lock().unwrap().is_empty());

        let (fid, vid) = store
            .write_scope(|s, ctx| s.create_feature(ctx, FeatureRow::default()))
            .unwrap();
        assert_eq!(vid, Some(Vid::new(2)));
        let changes = store
            .read(|s| s.changes(Vid::new(1), None, None, 10))
            .unwrap()
            .unwrap();
        assert_eq!(changes.entries.len(), 1);
        assert_eq!(fid, Fid::new(1));
    }

    #[test]
    fn test_persist_failure_discards_write() {
        let store = LayerStore::with_sink(state(), Arc::new(FailingSink));
        let result = store.write_scope(|s, ctx| s.create_feature(ctx, FeatureRow::default()));
        assert!(matches!(result, Err(VersionError::Storage(_))));
        assert_eq!(store.read(|s| s.schema().feature_count()).unwrap(), 0);
    }
}
