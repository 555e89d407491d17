//! Feature attachments
//!
//! Attachment metadata is versioned; content lives in file objects keyed by
//! UUID and is never rewritten, so old metadata versions keep pointing at
//! valid content.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::layer::Fid;
use crate::versioning::{
    ChangeKind, VersionContext, VersionError, VersionResult, VersionedTable, Vid, WriteOutcome,
};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Per-layer attachment identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Aid(u64);

impl Aid {
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Versioned attachment metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub fid: Fid,
    pub name: String,
    pub keyname: Option<String>,
    pub description: Option<String>,
    pub mime_type: String,
    pub size: u64,
    pub fileobj: Uuid,
    pub sha256: String,
}

impl Attachment {
    /// Metadata as JSON, without the owning fid.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("name".to_string(), json!(self.name));
        out.insert("keyname".to_string(), json!(self.keyname));
        out.insert("description".to_string(), json!(self.description));
        out.insert("mime_type".to_string(), json!(self.mime_type));
        out.insert("size".to_string(), json!(self.size));
        out.insert("fileobj".to_string(), json!(self.fileobj));
        out.insert("sha256".to_string(), json!(self.sha256));
        out
    }
}

/// Stored attachment content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    pub sha256: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

mod base64_bytes {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Content and metadata of a new attachment.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachmentSource {
    pub name: String,
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl AttachmentSource {
    /// Builds a source from base64 text.
    pub fn from_base64(name: String, mime_type: Option<String>, data: &str) -> Result<Self, String> {
        let data = BASE64
            .decode(data)
            .map_err(|e| format!("invalid base64 content: {}", e))?;
        Ok(Self {
            name,
            mime_type,
            data,
        })
    }
}

/// Metadata changes; `None` leaves a value as it is.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttachmentPatch {
    pub name: Option<String>,
    pub keyname: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub mime_type: Option<String>,
}

impl AttachmentPatch {
    fn apply(&self, base: &Attachment) -> Attachment {
        let mut next = base.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(keyname) = &self.keyname {
            next.keyname = keyname.clone();
        }
        if let Some(description) = &self.description {
            next.description = description.clone();
        }
        if let Some(mime_type) = &self.mime_type {
            next.mime_type = mime_type.clone();
        }
        next
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentStore {
    table: VersionedTable<Aid, Attachment>,
    aid_seq: u64,
    fileobjs: BTreeMap<Uuid, FileObject>,
}

impl AttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, aid: Aid) -> Option<&Attachment> {
        self.table.get(&aid)
    }

    #[inline]
    pub fn vid_of(&self, aid: Aid) -> Option<Vid> {
        self.table.vid_of(&aid)
    }

    #[inline]
    pub fn is_deleted(&self, aid: Aid) -> bool {
        self.table.is_deleted(&aid)
    }

    /// Owning fid of an attachment, live or deleted.
    pub fn owner(&self, aid: Aid) -> Option<Fid> {
        self.table
            .get(&aid)
            .or_else(|| self.table.last_snapshot(&aid))
            .map(|a| a.fid)
    }

    pub fn check_expected(&self, aid: Aid, expected: Option<Vid>) -> VersionResult<()> {
        self.table.check_expected(&aid, expected)
    }

    /// Live attachments of `fid` in aid order.
    pub fn for_fid(&self, fid: Fid) -> Vec<(Aid, &Attachment)> {
        self.table
            .rows()
            .filter(|(_, a)| a.fid == fid)
            .map(|(aid, a)| (*aid, a))
            .collect()
    }

    /// Content of a live attachment.
    pub fn content(&self, aid: Aid) -> Option<&[u8]> {
        let attachment = self.table.get(&aid)?;
        self.fileobjs
            .get(&attachment.fileobj)
            .map(|f| f.data.as_slice())
    }

    /// Stores the content and inserts the metadata under a new aid.
    pub fn create(
        &mut self,
        ctx: &mut VersionContext,
        fid: Fid,
        source: AttachmentSource,
        keyname: Option<String>,
        description: Option<String>,
    ) -> VersionResult<Aid> {
        let sha256 = format!("{:x}", Sha256::digest(&source.data));
        let fileobj = Uuid::new_v4();
        let attachment = Attachment {
            fid,
            name: source.name,
            keyname,
            description,
            mime_type: source
                .mime_type
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            size: source.data.len() as u64,
            fileobj,
            sha256: sha256.clone(),
        };
        let aid = Aid::new(self.aid_seq + 1);
        ctx.record(self.table.insert(aid, attachment, ctx.vid())?);
        self.fileobjs.insert(
            fileobj,
            FileObject {
                sha256,
                data: source.data,
            },
        );
        self.aid_seq = aid.value();
        Ok(aid)
    }

    pub fn update(&mut self, ctx: &mut VersionContext, aid: Aid, patch: &AttachmentPatch) -> VersionResult<WriteOutcome> {
        let base = self
            .table
            .get(&aid)
            .ok_or_else(|| VersionError::NotFound(aid.to_string()))?;
        let next = patch.apply(base);
        Ok(ctx.record(self.table.update(aid, next, ctx.vid())?))
    }

    pub fn delete(&mut self, ctx: &mut VersionContext, aid: Aid) -> VersionResult<WriteOutcome> {
        Ok(ctx.record(self.table.delete(aid, ctx.vid())?))
    }

    pub fn restore(&mut self, ctx: &mut VersionContext, aid: Aid) -> VersionResult<WriteOutcome> {
        Ok(ctx.record(self.table.restore(aid, None, ctx.vid())?))
    }

    /// Deletes every live attachment of `fid`.
    pub fn delete_for_fid(&mut self, ctx: &mut VersionContext, fid: Fid) -> VersionResult<()> {
        let aids: Vec<Aid> = self.for_fid(fid).into_iter().map(|(aid, _)| aid).collect();
        for aid in aids {
            self.delete(ctx, aid)?;
        }
        Ok(())
    }

    pub(crate) fn table(&self) -> &VersionedTable<Aid, Attachment> {
        &self.table
    }

    pub(crate) fn table_mut(&mut self) -> &mut VersionedTable<Aid, Attachment> {
        &mut self.table
    }

    /// Aids written in `(initial, target]`, grouped by owning fid.
    pub fn changed_by_fid(&self, initial: Vid, target: Vid) -> BTreeMap<Fid, Vec<Aid>> {
        let mut grouped: BTreeMap<Fid, Vec<Aid>> = BTreeMap::new();
        for aid in self.table.changed_keys(initial, target, None, usize::MAX) {
            if let Some(fid) = self.owner(aid) {
                grouped.entry(fid).or_default().push(aid);
            }
        }
        grouped
    }

    /// Feed entry for one attachment between `initial` and `target`.
    pub fn change_entry(&self, aid: Aid, initial: Vid, target: Vid) -> Option<Value> {
        let change = self.table.net_change(aid, initial, target)?;
        let action = match change.kind {
            ChangeKind::Create => "attachment.create",
            ChangeKind::Update => "attachment.update",
            ChangeKind::Delete => "attachment.delete",
            ChangeKind::Restore => "attachment.restore",
        };
        let owner = change.after.or(change.before)?;
        let mut out = Map::new();
        out.insert("action".to_string(), json!(action));
        out.insert("fid".to_string(), json!(owner.fid));
        out.insert("aid".to_string(), json!(aid));
        out.insert("vid".to_string(), json!(change.vid));
        if let Some(after) = change.after {
            out.extend(after.to_json());
        }
        Some(Value::Object(out))
    }

    /// Drops file objects no stored metadata version refers to.
    pub fn collect_garbage(&mut self) -> usize {
        let referenced: BTreeSet<Uuid> = self.table.stored_rows().map(|a| a.fileobj).collect();
        let before = self.fileobjs.len();
        self.fileobjs.retain(|id, _| referenced.contains(id));
        before - self.fileobjs.len()
    }
}
