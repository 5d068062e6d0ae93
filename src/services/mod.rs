pub mod cache;
pub mod export;
pub mod generation;
pub mod postprocess;
pub mod retry;
pub mod scheduler;
pub mod setup;
pub mod workflow;
