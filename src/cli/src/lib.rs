//! Bootkit CLI - build boot images from container images and run them.

pub mod commands;
pub mod output;
