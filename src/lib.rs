pub mod config;
pub mod geometry;
pub mod pipeline;
pub mod store;
pub mod summation;
