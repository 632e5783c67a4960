//! `supercache`: a full-page response cache for content sites, plus the
//! reference host that serves pages through it.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
