//! Terminal host for the research assistant.
//!
//! Loads settings, opens one provider stream per prompt and renders the chat and
//! artifact surfaces produced by `deepres-demux`.

#![deny(unsafe_code)]

pub mod app;
pub mod cli;
pub mod session;
pub mod settings;
