// src/models/mod.rs

pub mod attempt;
pub mod credential;
pub mod exam;
pub mod principal;
