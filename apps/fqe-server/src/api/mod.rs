pub mod export;
pub mod meta;
pub mod query;
pub mod session;
