//! Typed actions
//!
//! Every staged operation is parsed into an [`Action`], validated against the
//! committed layer state without touching it, and later applied to the
//! commit's scratch state inside the commit's version.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use super::errors::{ActionError, ActionResult, Domain};
use super::registry::{self, ActionKind};
use crate::extensions::{Aid, AttachmentPatch, AttachmentSource};
use crate::geometry::Geometry;
use crate::layer::{FeaturePatch, FeatureRow, Fid, GeomPatch};
use crate::store::LayerState;
use crate::versioning::{VersionContext, VersionResult, Vid};

/// An entity id, or `{"sn": n}` naming the entity created by slot `n` of the
/// same commit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ref<T> {
    Id(T),
    Seq { sn: u64 },
}

/// What an applied action produced.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutput {
    Feature { fid: Fid, changed: Option<bool> },
    Description { fid: Fid },
    Attachment { aid: Aid },
    Revert { changed: usize },
}

impl ActionOutput {
    pub fn to_json(&self) -> Value {
        match self {
            ActionOutput::Feature {
                fid,
                changed: Some(changed),
            } => json!({"fid": fid, "changed": changed}),
            ActionOutput::Feature { fid, changed: None } => json!({"fid": fid}),
            ActionOutput::Description { fid } => json!({"fid": fid}),
            ActionOutput::Attachment { aid } => json!({"aid": aid}),
            ActionOutput::Revert { changed } => json!({"changed": changed}),
        }
    }
}

/// Outputs of already applied slots, by seqnum.
pub type Produced = BTreeMap<u64, ActionOutput>;

/// Kinds of the slots staged in a commit, by seqnum.
pub type Staged = BTreeMap<u64, ActionKind>;

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    FeatureCreate {
        geom: Option<Geometry>,
        fields: Map<String, Value>,
    },
    FeatureUpdate {
        fid: Ref<Fid>,
        vid: Option<Vid>,
        patch: FeaturePatch,
    },
    FeatureDelete {
        fid: Ref<Fid>,
        vid: Option<Vid>,
    },
    FeatureRestore {
        fid: Fid,
        row: Option<(Option<Geometry>, Map<String, Value>)>,
    },
    DescriptionPut {
        fid: Ref<Fid>,
        vid: Option<Vid>,
        value: Option<String>,
    },
    DescriptionRestore {
        fid: Fid,
    },
    AttachmentCreate {
        fid: Ref<Fid>,
        source: AttachmentSource,
        keyname: Option<String>,
        description: Option<String>,
    },
    AttachmentUpdate {
        aid: Ref<Aid>,
        vid: Option<Vid>,
        patch: AttachmentPatch,
    },
    AttachmentDelete {
        aid: Ref<Aid>,
        vid: Option<Vid>,
    },
    AttachmentRestore {
        aid: Aid,
    },
    Revert {
        tid: Vid,
    },
}

// ==================
// Payloads
// ==================

/// Distinguishes an absent key from an explicit `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct FeatureCreatePayload {
    #[serde(default)]
    geom: Option<String>,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct FeatureUpdatePayload {
    fid: Ref<Fid>,
    #[serde(default)]
    vid: Option<Vid>,
    #[serde(default, deserialize_with = "present")]
    geom: Option<Option<String>>,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct FeatureRestorePayload {
    fid: Fid,
    #[serde(default, deserialize_with = "present")]
    geom: Option<Option<String>>,
    #[serde(default)]
    fields: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct FidTarget {
    fid: Ref<Fid>,
    #[serde(default)]
    vid: Option<Vid>,
}

#[derive(Deserialize)]
struct FidOnly {
    fid: Fid,
}

#[derive(Deserialize)]
struct DescriptionPutPayload {
    fid: Ref<Fid>,
    #[serde(default)]
    vid: Option<Vid>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct SourcePayload {
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Deserialize)]
struct AttachmentCreatePayload {
    fid: Ref<Fid>,
    source: SourcePayload,
    #[serde(default)]
    keyname: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct AttachmentUpdatePayload {
    aid: Ref<Aid>,
    #[serde(default)]
    vid: Option<Vid>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    keyname: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    description: Option<Option<String>>,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Deserialize)]
struct AidTarget {
    aid: Ref<Aid>,
    #[serde(default)]
    vid: Option<Vid>,
}

#[derive(Deserialize)]
struct AidOnly {
    aid: Aid,
}

#[derive(Deserialize)]
struct RevertPayload {
    tid: Vid,
}

fn decode<T: DeserializeOwned>(domain: Domain, payload: &Value) -> ActionResult<T> {
    T::deserialize(payload).map_err(|e| ActionError::invalid(domain, e.to_string()))
}

fn parse_geom(text: &str) -> ActionResult<Geometry> {
    Geometry::parse_any(text).map_err(|e| ActionError::invalid(Domain::Feature, e.to_string()))
}

fn parse_opt_geom(text: Option<String>) -> ActionResult<Option<Geometry>> {
    text.as_deref().map(parse_geom).transpose()
}

// ==================
// Shared checks
// ==================

fn mapped<T>(domain: Domain, result: VersionResult<T>) -> ActionResult<T> {
    result.map_err(|e| ActionError::from_version(domain, e))
}

/// Checks a forward reference at validation time.
///
/// Returns the id for a plain reference and `None` for a reference to an
/// entity created earlier in the same commit.
fn check_ref<T: Copy>(reference: &Ref<T>, domain: Domain, creates: Domain, seqnum: u64, staged: &Staged) -> ActionResult<Option<T>> {
    match reference {
        Ref::Id(id) => Ok(Some(*id)),
        Ref::Seq { sn } => {
            if *sn >= seqnum {
                return Err(ActionError::invalid(
                    domain,
                    format!("reference to slot {} must point to a lower slot", sn),
                ));
            }
            match staged.get(sn) {
                Some(kind) if kind.creates() == Some(creates) => Ok(None),
                _ => Err(ActionError::invalid(
                    domain,
                    format!("slot {} does not create a {}", sn, creates),
                )),
            }
        }
    }
}

fn resolve_fid(reference: &Ref<Fid>, domain: Domain, produced: &Produced) -> ActionResult<Fid> {
    match reference {
        Ref::Id(fid) => Ok(*fid),
        Ref::Seq { sn } => match produced.get(sn) {
            Some(ActionOutput::Feature { fid, .. }) => Ok(*fid),
            _ => Err(ActionError::invalid(domain, format!("unresolved reference to slot {}", sn))),
        },
    }
}

fn resolve_aid(reference: &Ref<Aid>, produced: &Produced) -> ActionResult<Aid> {
    match reference {
        Ref::Id(aid) => Ok(*aid),
        Ref::Seq { sn } => match produced.get(sn) {
            Some(ActionOutput::Attachment { aid }) => Ok(*aid),
            _ => Err(ActionError::invalid(
                Domain::Attachment,
                format!("unresolved reference to slot {}", sn),
            )),
        },
    }
}

fn require_feature(state: &LayerState, domain: Domain, fid: Fid) -> ActionResult<()> {
    if state.schema().get(fid).is_none() {
        return Err(ActionError::not_found(domain, format!("feature {} not found", fid)));
    }
    Ok(())
}

fn require_versioning(state: &LayerState, domain: Domain) -> ActionResult<()> {
    if !state.schema().is_versioned() {
        return Err(ActionError::versioning_required(
            domain,
            "versioning is not enabled for this layer",
        ));
    }
    Ok(())
}

/// Applies the optimistic `vid` rule to an existing entity.
fn check_vid(
    state: &LayerState,
    kind: ActionKind,
    exists: bool,
    vid: Option<Vid>,
    check: impl FnOnce(Option<Vid>) -> VersionResult<()>,
) -> ActionResult<()> {
    let domain = kind.domain();
    if state.schema().is_versioned() && exists && vid.is_none() && kind.spec().requires_version_on_existing {
        return Err(ActionError::versioning_required(
            domain,
            format!("vid is required to modify an existing {}", domain),
        ));
    }
    mapped(domain, check(vid))
}

impl Action {
    // ==================
    // Parse
    // ==================

    /// Parses a staged payload `{"action": name, ...}`.
    pub fn parse(payload: &Value) -> ActionResult<Action> {
        let object = payload
            .as_object()
            .ok_or_else(|| ActionError::InvalidPayload("operation must be a JSON object".to_string()))?;
        let name = object
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::InvalidPayload("operation has no action name".to_string()))?;
        let spec = registry::lookup(name).ok_or_else(|| ActionError::UnknownAction(name.to_string()))?;
        let domain = spec.domain;

        let action = match spec.kind {
            ActionKind::FeatureCreate => {
                let p: FeatureCreatePayload = decode(domain, payload)?;
                Action::FeatureCreate {
                    geom: parse_opt_geom(p.geom)?,
                    fields: p.fields,
                }
            }
            ActionKind::FeatureUpdate => {
                let p: FeatureUpdatePayload = decode(domain, payload)?;
                let geom = match p.geom {
                    None => GeomPatch::Keep,
                    Some(None) => GeomPatch::Clear,
                    Some(Some(text)) => GeomPatch::Set(parse_geom(&text)?),
                };
                Action::FeatureUpdate {
                    fid: p.fid,
                    vid: p.vid,
                    patch: FeaturePatch {
                        geom,
                        fields: p.fields,
                    },
                }
            }
            ActionKind::FeatureDelete => {
                let p: FidTarget = decode(domain, payload)?;
                Action::FeatureDelete {
                    fid: p.fid,
                    vid: p.vid,
                }
            }
            ActionKind::FeatureRestore => {
                let p: FeatureRestorePayload = decode(domain, payload)?;
                let row = if p.geom.is_some() || p.fields.is_some() {
                    Some((parse_opt_geom(p.geom.flatten())?, p.fields.unwrap_or_default()))
                } else {
                    None
                };
                Action::FeatureRestore { fid: p.fid, row }
            }
            ActionKind::DescriptionPut => {
                let p: DescriptionPutPayload = decode(domain, payload)?;
                Action::DescriptionPut {
                    fid: p.fid,
                    vid: p.vid,
                    value: p.value,
                }
            }
            ActionKind::DescriptionRestore => {
                let p: FidOnly = decode(domain, payload)?;
                Action::DescriptionRestore { fid: p.fid }
            }
            ActionKind::AttachmentCreate => {
                let p: AttachmentCreatePayload = decode(domain, payload)?;
                let source = AttachmentSource::from_base64(p.source.name, p.source.mime_type, &p.source.data)
                    .map_err(|e| ActionError::invalid(domain, e))?;
                Action::AttachmentCreate {
                    fid: p.fid,
                    source,
                    keyname: p.keyname,
                    description: p.description,
                }
            }
            ActionKind::AttachmentUpdate => {
                let p: AttachmentUpdatePayload = decode(domain, payload)?;
                Action::AttachmentUpdate {
                    aid: p.aid,
                    vid: p.vid,
                    patch: AttachmentPatch {
                        name: p.name,
                        keyname: p.keyname,
                        description: p.description,
                        mime_type: p.mime_type,
                    },
                }
            }
            ActionKind::AttachmentDelete => {
                let p: AidTarget = decode(domain, payload)?;
                Action::AttachmentDelete {
                    aid: p.aid,
                    vid: p.vid,
                }
            }
            ActionKind::AttachmentRestore => {
                let p: AidOnly = decode(domain, payload)?;
                Action::AttachmentRestore { aid: p.aid }
            }
            ActionKind::Revert => {
                let p: RevertPayload = decode(domain, payload)?;
                Action::Revert { tid: p.tid }
            }
        };
        Ok(action)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::FeatureCreate { .. } => ActionKind::FeatureCreate,
            Action::FeatureUpdate { .. } => ActionKind::FeatureUpdate,
            Action::FeatureDelete { .. } => ActionKind::FeatureDelete,
            Action::FeatureRestore { .. } => ActionKind::FeatureRestore,
            Action::DescriptionPut { .. } => ActionKind::DescriptionPut,
            Action::DescriptionRestore { .. } => ActionKind::DescriptionRestore,
            Action::AttachmentCreate { .. } => ActionKind::AttachmentCreate,
            Action::AttachmentUpdate { .. } => ActionKind::AttachmentUpdate,
            Action::AttachmentDelete { .. } => ActionKind::AttachmentDelete,
            Action::AttachmentRestore { .. } => ActionKind::AttachmentRestore,
            Action::Revert { .. } => ActionKind::Revert,
        }
    }

    #[inline]
    pub fn domain(&self) -> Domain {
        self.kind().domain()
    }

    // ==================
    // Validate
    // ==================

    /// Checks the action against the committed state.
    ///
    /// `seqnum` is the slot of this action and `staged` the kinds of every
    /// slot in the commit, used to check forward references.
    pub fn validate(&self, seqnum: u64, state: &LayerState, staged: &Staged) -> ActionResult<()> {
        let kind = self.kind();
        let domain = kind.domain();
        let definition = state.definition();
        let schema = state.schema();
        let invalid = |e: crate::layer::LayerError| ActionError::invalid(domain, e.to_string());

        match self {
            Action::FeatureCreate { geom, fields } => {
                definition.build_row(geom.clone(), fields).map_err(invalid)?;
            }
            Action::FeatureUpdate { fid, vid, patch } => {
                match check_ref(fid, domain, Domain::Feature, seqnum, staged)? {
                    Some(fid) => {
                        let base = schema
                            .get(fid)
                            .ok_or_else(|| ActionError::not_found(domain, format!("feature {} not found", fid)))?;
                        check_vid(state, kind, true, *vid, |vid| schema.check_expected(fid, vid))?;
                        definition.apply_patch(base, patch).map_err(invalid)?;
                    }
                    None => {
                        definition
                            .apply_patch(&FeatureRow::default(), patch)
                            .map_err(invalid)?;
                    }
                }
            }
            Action::FeatureDelete { fid, vid } => {
                if let Some(fid) = check_ref(fid, domain, Domain::Feature, seqnum, staged)? {
                    require_feature(state, domain, fid)?;
                    check_vid(state, kind, true, *vid, |vid| schema.check_expected(fid, vid))?;
                }
            }
            Action::FeatureRestore { fid, row } => {
                require_versioning(state, domain)?;
                if schema.get(*fid).is_some() {
                    return Err(ActionError::invalid(domain, format!("feature {} is not deleted", fid)));
                }
                if !schema.is_deleted(*fid) {
                    return Err(ActionError::not_found(domain, format!("feature {} not found", fid)));
                }
                if let Some((geom, fields)) = row {
                    definition.build_row(geom.clone(), fields).map_err(invalid)?;
                }
            }
            Action::DescriptionPut { fid, vid, .. } => {
                if let Some(fid) = check_ref(fid, domain, Domain::Feature, seqnum, staged)? {
                    require_feature(state, domain, fid)?;
                    let descriptions = state.descriptions();
                    check_vid(state, kind, descriptions.exists(fid), *vid, |vid| {
                        descriptions.check_expected(fid, vid)
                    })?;
                }
            }
            Action::DescriptionRestore { fid } => {
                require_versioning(state, domain)?;
                require_feature(state, domain, *fid)?;
                let descriptions = state.descriptions();
                if descriptions.exists(*fid) {
                    return Err(ActionError::invalid(
                        domain,
                        format!("description of feature {} is not deleted", fid),
                    ));
                }
                if !descriptions.is_deleted(*fid) {
                    return Err(ActionError::not_found(
                        domain,
                        format!("no deleted description for feature {}", fid),
                    ));
                }
            }
            Action::AttachmentCreate { fid, .. } => {
                if let Some(fid) = check_ref(fid, domain, Domain::Feature, seqnum, staged)? {
                    require_feature(state, domain, fid)?;
                }
            }
            Action::AttachmentUpdate { aid, vid, .. } | Action::AttachmentDelete { aid, vid } => {
                if let Some(aid) = check_ref(aid, domain, Domain::Attachment, seqnum, staged)? {
                    let attachments = state.attachments();
                    if attachments.get(aid).is_none() {
                        return Err(ActionError::not_found(domain, format!("attachment {} not found", aid)));
                    }
                    check_vid(state, kind, true, *vid, |vid| attachments.check_expected(aid, vid))?;
                }
            }
            Action::AttachmentRestore { aid } => {
                require_versioning(state, domain)?;
                let attachments = state.attachments();
                if attachments.get(*aid).is_some() {
                    return Err(ActionError::invalid(domain, format!("attachment {} is not deleted", aid)));
                }
                let owner = attachments
                    .owner(*aid)
                    .filter(|_| attachments.is_deleted(*aid))
                    .ok_or_else(|| ActionError::not_found(domain, format!("attachment {} not found", aid)))?;
                require_feature(state, domain, owner)?;
            }
            Action::Revert { tid } => {
                mapped(domain, schema.check_version(*tid))?;
            }
        }
        Ok(())
    }

    // ==================
    // Apply
    // ==================

    /// Applies the action inside `ctx`, resolving references from `produced`.
    pub fn apply(&self, state: &mut LayerState, ctx: &mut VersionContext, produced: &Produced) -> ActionResult<ActionOutput> {
        let domain = self.domain();
        let invalid = |e: crate::layer::LayerError| ActionError::invalid(domain, e.to_string());

        let output = match self {
            Action::FeatureCreate { geom, fields } => {
                let row = state.definition().build_row(geom.clone(), fields).map_err(invalid)?;
                let fid = mapped(domain, state.create_feature(ctx, row))?;
                ActionOutput::Feature { fid, changed: None }
            }
            Action::FeatureUpdate { fid, patch, .. } => {
                let fid = resolve_fid(fid, domain, produced)?;
                let row = {
                    let base = state
                        .schema()
                        .get(fid)
                        .ok_or_else(|| ActionError::not_found(domain, format!("feature {} not found", fid)))?;
                    state.definition().apply_patch(base, patch).map_err(invalid)?
                };
                let outcome = mapped(domain, state.update_feature(ctx, fid, row, None))?;
                ActionOutput::Feature {
                    fid,
                    changed: Some(outcome.is_changed()),
                }
            }
            Action::FeatureDelete { fid, .. } => {
                let fid = resolve_fid(fid, domain, produced)?;
                mapped(domain, state.delete_feature(ctx, fid, None))?;
                ActionOutput::Feature { fid, changed: None }
            }
            Action::FeatureRestore { fid, row } => {
                let row = match row {
                    Some((geom, fields)) => Some(state.definition().build_row(geom.clone(), fields).map_err(invalid)?),
                    None => None,
                };
                mapped(domain, state.restore_feature(ctx, *fid, row))?;
                ActionOutput::Feature {
                    fid: *fid,
                    changed: None,
                }
            }
            Action::DescriptionPut { fid, value, .. } => {
                let fid = resolve_fid(fid, domain, produced)?;
                mapped(domain, state.put_description(ctx, fid, value.clone(), None))?;
                ActionOutput::Description { fid }
            }
            Action::DescriptionRestore { fid } => {
                mapped(domain, state.restore_description(ctx, *fid))?;
                ActionOutput::Description { fid: *fid }
            }
            Action::AttachmentCreate {
                fid,
                source,
                keyname,
                description,
            } => {
                let fid = resolve_fid(fid, domain, produced)?;
                let aid = mapped(
                    domain,
                    state.create_attachment(ctx, fid, source.clone(), keyname.clone(), description.clone()),
                )?;
                ActionOutput::Attachment { aid }
            }
            Action::AttachmentUpdate { aid, patch, .. } => {
                let aid = resolve_aid(aid, produced)?;
                mapped(domain, state.update_attachment(ctx, aid, patch, None))?;
                ActionOutput::Attachment { aid }
            }
            Action::AttachmentDelete { aid, .. } => {
                let aid = resolve_aid(aid, produced)?;
                mapped(domain, state.delete_attachment(ctx, aid, None))?;
                ActionOutput::Attachment { aid }
            }
            Action::AttachmentRestore { aid } => {
                mapped(domain, state.restore_attachment(ctx, *aid))?;
                ActionOutput::Attachment { aid: *aid }
            }
            Action::Revert { tid } => {
                let changed = mapped(domain, state.revert_to(ctx, *tid))?;
                ActionOutput::Revert { changed }
            }
        };
        Ok(output)
    }
}
