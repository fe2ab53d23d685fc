//! File-backed adapters.

mod models;
mod store;

pub use store::FileTaskStore;
