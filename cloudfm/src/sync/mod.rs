pub mod queue;
pub mod worker;

pub use queue::{QueueError, UploadEntry, UploadQueue, remote_name_for};
pub use worker::{
    ItemFailure, TransferWorker, UploadBatch, UploadProgress, UploadReport, WorkerError,
};
