//! Application services: content management and page rendering.

pub mod content;
pub mod error;
pub mod render;
