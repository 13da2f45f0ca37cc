//! # Model Families

pub mod irnext;
