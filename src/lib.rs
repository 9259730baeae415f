pub mod bracket;
pub mod collaborators;
pub mod config;
pub mod draft;
pub mod error;
pub mod locks;
pub mod memory;
pub mod prediction;
pub mod propagation;
pub mod reachability;
pub mod reconcile;
pub mod scoring;
pub mod service;
pub mod simulate;
pub mod sqlite_store;
pub mod third_place;
