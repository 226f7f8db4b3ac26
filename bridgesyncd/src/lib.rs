pub mod backoff;
pub mod daemon;
pub mod directory_store;
pub mod logging;
