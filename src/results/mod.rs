//! Result files: durable local storage and hand-off to the upload target.
//!
//! A finished [`RepoResult`](crate::types::RepoResult) is written to
//! `<results_dir>/<id>.json` with a write-fsync-rename sequence, then handed
//! to an [`Uploader`]: an FTPS server when one is configured, a directory
//! otherwise. The local file is removed once the upload succeeded.

pub mod fsync;
pub mod ftp;
pub mod store;
pub mod upload;

pub use ftp::{FtpConnector, FtpSession, FtpSettings, FtpUploader, FtpsConnector};
pub use store::{StoreError, load_result, persist_result, write_json_atomic};
pub use upload::{DirectoryUploader, UploadError, Uploader};
