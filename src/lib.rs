pub mod backend;
pub mod backup;
pub mod cli;
pub mod daemon;
pub mod errors;
pub mod models;
pub mod server;
pub mod storage;
