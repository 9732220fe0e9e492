pub mod cache;
pub mod config;
pub mod corpus;
pub mod dates;
pub mod diagnostics;
pub mod errors;
pub mod family_web;
pub mod names;
pub mod network;
pub mod resolution;
pub mod sources;
pub mod sync;
pub mod types;

pub use family_web::FamilyWeb;
