//! Feature extensions
//!
//! Stores layered on top of features that share the layer's version
//! sequence: one description per feature and any number of attachments.

mod attachment;
mod description;

pub use attachment::{
    Aid, Attachment, AttachmentPatch, AttachmentSource, AttachmentStore, FileObject,
};
pub use description::DescriptionStore;
