// src/api/mod.rs

pub mod payments;
pub mod webhooks;
