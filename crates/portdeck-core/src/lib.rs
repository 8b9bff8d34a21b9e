#![deny(clippy::all, warnings)]

pub mod api;

mod bus;
mod callback;
mod catalog;
mod config;
mod engine;
mod fetch;
mod install;
mod outcome;
mod registry;
mod runtime;
mod source;
mod uninstall;

#[cfg(test)]
mod testserver;

pub use crate::api::*;
