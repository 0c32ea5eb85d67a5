pub mod create;
pub mod delete;
pub mod process;
pub mod reprocess;
pub mod split;

pub use create::{CreateUploadCommand, CreateUploadError, CreateUploadResponse};
pub use delete::{DeleteUploadCommand, DeleteUploadError, DeleteUploadResponse};
pub use process::{ProcessUploadCommand, ProcessUploadError, ProcessUploadResponse};
pub use reprocess::{ReprocessUploadCommand, ReprocessUploadError, ReprocessUploadResponse};
pub use split::{SplitUploadCommand, SplitUploadError, SplitUploadResponse};
