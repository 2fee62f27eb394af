//! Browse a directory of model files alongside their notes, preview images
//! and video thumbnails, served as a small local web page.

pub mod config;
pub mod logging;
pub mod scanner;
pub mod server;
pub mod tasks;
