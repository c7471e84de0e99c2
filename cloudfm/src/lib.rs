pub mod archive;
pub mod config;
pub mod controller;
pub mod prompt;
pub mod storage;
pub mod sync;
