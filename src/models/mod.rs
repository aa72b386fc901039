// src/models/mod.rs

pub mod attempt;
pub mod lesson;
pub mod overrides;
pub mod page;
