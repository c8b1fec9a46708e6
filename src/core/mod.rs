pub mod cast;
pub mod config;
pub mod lifecycle;
pub mod store;
pub mod terminal;
pub mod worker;
