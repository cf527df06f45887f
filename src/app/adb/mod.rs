pub mod cli;
pub mod collaborators;
pub mod fetchers;
pub mod locator;
pub mod parse;
pub mod paths;
pub mod pending;
pub mod receiver;
pub mod runner;
pub mod transfer;
