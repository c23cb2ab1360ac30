// Domain layer - Core types and clip policies

pub mod errors;
pub mod model;
pub mod rules;
