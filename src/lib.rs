pub mod auth;
pub mod bundle_server;
pub mod command;
pub mod config;
pub mod daemon_state;
pub mod error;
pub mod http;
pub mod layout;
pub mod remote;
pub mod repository;
pub mod scenario;
pub mod web_server;
pub mod world;

pub use crate::config::Settings;
pub use error::{HarnessError, Result};
pub use scenario::{Expectation, Scenario, ScenarioOutcome, Step, run_scenario, run_steps};
pub use world::{Actor, ScenarioWorld, TeardownAction, TeardownReport};
