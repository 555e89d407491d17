//! Point-in-time reads

use super::errors::{VersionError, VersionResult};
use super::schema::{FeatureSnapshot, VersionSchema};
use super::types::Vid;

impl VersionSchema {
    /// Checks `at` lies in `0..=latest` of a versioned layer.
    pub(crate) fn check_version(&self, at: Vid) -> VersionResult<Vid> {
        let latest = self.latest().ok_or(VersionError::VersioningDisabled)?;
        if at > latest {
            return Err(VersionError::InvalidRange(format!(
                "version {} is beyond latest {}",
                at, latest
            )));
        }
        Ok(latest)
    }

    /// Features as they were at version `at`.
    pub fn query_pit(&self, at: Vid) -> VersionResult<Vec<FeatureSnapshot<'_>>> {
        self.check_version(at)?;
        Ok(self
            .features
            .rows_at(at)
            .into_iter()
            .map(|(fid, vid, row)| FeatureSnapshot {
                fid,
                vid: Some(vid),
                row,
            })
            .collect())
    }

    /// Current features, or the features at `version` when given.
    pub fn feature_list_at(&self, version: Option<Vid>) -> VersionResult<Vec<FeatureSnapshot<'_>>> {
        match version {
            Some(at) => self.query_pit(at),
            None => Ok(self.feature_list()),
        }
    }
}
