//! Two-phase write protocol: single-file (`spec.md` §4.F) and atomic
//! multi-file batch (§4.G) write managers built on `flycode_fs`'s
//! `commit_write` primitive.

mod batch;
mod manager;
mod types;

pub use batch::WriteBatchManager;
pub use manager::WriteManager;
pub use types::CommitWriteBatchResult;
pub use types::CommitWriteFileResult;
pub use types::PendingWriteBatchOp;
pub use types::PendingWriteFile;
pub use types::PendingWriteOp;
pub use types::PrepareWriteBatchInput;
pub use types::PrepareWriteBatchResult;
pub use types::PrepareWriteFileInput;
pub use types::PrepareWriteInput;
pub use types::PrepareWriteResult;
