pub mod approval;
pub mod backup;
pub mod checkpoint;
pub mod config;
pub mod decision;
pub mod error;
pub mod graph;
pub mod io;
pub mod machine;
pub mod parallel;
pub mod paths;
pub mod preflight;
pub mod recovery;
pub mod status;
pub mod store;
pub mod types;
pub mod validate;
pub mod workflow;

pub use error::{Error, Result};
