pub mod catalog;
pub mod config;
pub mod error;
pub mod io;
pub mod media;
pub mod state;
pub mod store;
