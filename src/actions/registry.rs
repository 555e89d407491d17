//! Action name table
//!
//! The closed set of mutation kinds a transaction may stage, looked up by
//! name.

use super::errors::Domain;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    FeatureCreate,
    FeatureUpdate,
    FeatureDelete,
    FeatureRestore,
    DescriptionPut,
    DescriptionRestore,
    AttachmentCreate,
    AttachmentUpdate,
    AttachmentDelete,
    AttachmentRestore,
    Revert,
}

/// Static description of one action.
#[derive(Debug)]
pub struct ActionSpec {
    pub name: &'static str,
    pub kind: ActionKind,
    pub domain: Domain,
    /// Whether a versioned layer demands `vid` for an existing target
    pub requires_version_on_existing: bool,
}

static FEATURE_CREATE: ActionSpec = ActionSpec {
    name: "feature.create",
    kind: ActionKind::FeatureCreate,
    domain: Domain::Feature,
    requires_version_on_existing: false,
};

static FEATURE_UPDATE: ActionSpec = ActionSpec {
    name: "feature.update",
    kind: ActionKind::FeatureUpdate,
    domain: Domain::Feature,
    requires_version_on_existing: true,
};

static FEATURE_DELETE: ActionSpec = ActionSpec {
    name: "feature.delete",
    kind: ActionKind::FeatureDelete,
    domain: Domain::Feature,
    requires_version_on_existing: true,
};

static FEATURE_RESTORE: ActionSpec = ActionSpec {
    name: "feature.restore",
    kind: ActionKind::FeatureRestore,
    domain: Domain::Feature,
    requires_version_on_existing: false,
};

static DESCRIPTION_PUT: ActionSpec = ActionSpec {
    name: "description.put",
    kind: ActionKind::DescriptionPut,
    domain: Domain::Description,
    requires_version_on_existing: true,
};

static DESCRIPTION_RESTORE: ActionSpec = ActionSpec {
    name: "description.restore",
    kind: ActionKind::DescriptionRestore,
    domain: Domain::Description,
    requires_version_on_existing: false,
};

static ATTACHMENT_CREATE: ActionSpec = ActionSpec {
    name: "attachment.create",
    kind: ActionKind::AttachmentCreate,
    domain: Domain::Attachment,
    requires_version_on_existing: false,
};

static ATTACHMENT_UPDATE: ActionSpec = ActionSpec {
    name: "attachment.update",
    kind: ActionKind::AttachmentUpdate,
    domain: Domain::Attachment,
    requires_version_on_existing: true,
};

static ATTACHMENT_DELETE: ActionSpec = ActionSpec {
    name: "attachment.delete",
    kind: ActionKind::AttachmentDelete,
    domain: Domain::Attachment,
    requires_version_on_existing: true,
};

static ATTACHMENT_RESTORE: ActionSpec = ActionSpec {
    name: "attachment.restore",
    kind: ActionKind::AttachmentRestore,
    domain: Domain::Attachment,
    requires_version_on_existing: false,
};

static REVERT: ActionSpec = ActionSpec {
    name: "revert",
    kind: ActionKind::Revert,
    domain: Domain::Revert,
    requires_version_on_existing: false,
};

pub static ACTIONS: &[&ActionSpec] = &[
    &FEATURE_CREATE,
    &FEATURE_UPDATE,
    &FEATURE_DELETE,
    &FEATURE_RESTORE,
    &DESCRIPTION_PUT,
    &DESCRIPTION_RESTORE,
    &ATTACHMENT_CREATE,
    &ATTACHMENT_UPDATE,
    &ATTACHMENT_DELETE,
    &ATTACHMENT_RESTORE,
    &REVERT,
];

impl ActionKind {
    pub fn spec(&self) -> &'static ActionSpec {
        match self {
            ActionKind::FeatureCreate => &FEATURE_CREATE,
            ActionKind::FeatureUpdate => &FEATURE_UPDATE,
            ActionKind::FeatureDelete => &FEATURE_DELETE,
            ActionKind::FeatureRestore => &FEATURE_RESTORE,
            ActionKind::DescriptionPut => &DESCRIPTION_PUT,
            ActionKind::DescriptionRestore => &DESCRIPTION_RESTORE,
            ActionKind::AttachmentCreate => &ATTACHMENT_CREATE,
            ActionKind::AttachmentUpdate => &ATTACHMENT_UPDATE,
            ActionKind::AttachmentDelete => &ATTACHMENT_DELETE,
            ActionKind::AttachmentRestore => &ATTACHMENT_RESTORE,
            ActionKind::Revert => &REVERT,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.spec().name
    }

    #[inline]
    pub fn domain(&self) -> Domain {
        self.spec().domain
    }

    /// Domain of the entity this action brings into existence, if any.
    pub fn creates(&self) -> Option<Domain> {
        match self {
            ActionKind::FeatureCreate => Some(Domain::Feature),
            ActionKind::AttachmentCreate => Some(Domain::Attachment),
            _ => None,
        }
    }
}

pub fn lookup(name: &str) -> Option<&'static ActionSpec> {
    ACTIONS.iter().find(|spec| spec.name == name).copied()
}
