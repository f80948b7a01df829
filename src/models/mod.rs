//! Core data models for the transfer intake service.
//!
//! These entities describe stored transfers, the file-list metadata carried
//! inside each package, and the blobs written to the object store. They
//! serialize as JSON via `serde` using the field names the wider system
//! already speaks (`jobID`, `createdOn`, ...).

pub mod filelist;
pub mod object;
pub mod transfer;
