//! The engines: file lifecycle, share protocol, key rotation

pub mod access;
pub mod files;
pub mod rotation;
pub mod shares;

pub use files::{FileDownload, FileEngine, IngestRequest};
pub use rotation::{KeyRotationEngine, RotationProgress};
pub use shares::{
    AccessContext, CreateShareRequest, PublicShareInfo, ShareCredential, ShareEngine, ShareGrant,
    SharedDownload,
};
