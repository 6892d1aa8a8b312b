pub mod chat;
pub mod documents;
pub mod files;
pub mod liveness;
pub mod providers;
pub mod readiness;
