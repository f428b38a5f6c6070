//! Library crate for party-sync: shared documents kept in step across many
//! clients, presence, controller election and the co-op battle they drive.

pub mod config;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;
pub mod sync;
