//! Ordered scenario execution with guaranteed teardown.
//!
//! Steps run fail-fast in declaration order. Teardown always runs afterwards
//! and never hides the step failure.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Settings;
use crate::world::{Actor, ScenarioWorld, TeardownReport};

mod expectations;
mod steps;

pub use expectations::Expectation;
pub use steps::Step;

const SMOKE_ROUTE_PREFIX: &str = "e2e";
const LIFECYCLE_ROUTE_PREFIX: &str = "integration";
const MAIN_BRANCH: &str = "main";

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<Step>,
}

/// Result of one scenario: the first step failure, if any, and teardown.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub name: String,
    pub result: Result<()>,
    pub teardown: TeardownReport,
}

impl ScenarioOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

impl Scenario {
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Clone through the served bundle URI.
    ///
    /// Without `remote_url` a local remote is created and seeded with commits,
    /// which also allows the branch tip check.
    #[must_use]
    pub fn smoke(port: u16, remote_url: Option<&str>) -> Self {
        let mut steps = match remote_url {
            Some(url) => vec![Step::RemoteRepository {
                url: url.to_string(),
            }],
            None => vec![
                Step::NewRemoteRepository {
                    main_branch: MAIN_BRANCH.to_string(),
                },
                Step::PushCommits {
                    actor: Actor::Another,
                    count: 3,
                    branch: MAIN_BRANCH.to_string(),
                },
            ],
        };
        steps.extend([
            Step::InitBundleServer {
                route_prefix: SMOKE_ROUTE_PREFIX.to_string(),
                route: None,
            },
            Step::StartWebServer { port },
            Step::CloneWithBundleUri { actor: Actor::Me },
            Step::Assert(Expectation::BundlesDownloadedAndUsed { actor: Actor::Me }),
            Step::Assert(Expectation::BundleListServed {
                auth: None,
                status: 200,
            }),
        ]);
        if remote_url.is_none() {
            steps.push(Step::Assert(Expectation::BranchTipMatches {
                actor: Actor::Me,
                branch: MAIN_BRANCH.to_string(),
            }));
        }
        Self::new("clone with bundle URI", steps)
    }

    /// Init, update and delete one route through the CLI.
    #[must_use]
    pub fn route_lifecycle(route: &str) -> Self {
        let steps = vec![
            Step::NewRemoteRepository {
                main_branch: MAIN_BRANCH.to_string(),
            },
            Step::PushCommits {
                actor: Actor::Another,
                count: 1,
                branch: MAIN_BRANCH.to_string(),
            },
            Step::Assert(Expectation::RouteAbsent {
                route: route.to_string(),
            }),
            Step::InitBundleServer {
                route_prefix: LIFECYCLE_ROUTE_PREFIX.to_string(),
                route: Some(route.to_string()),
            },
            Step::Assert(Expectation::RouteExists {
                route: route.to_string(),
            }),
            Step::Assert(Expectation::RouteListed),
            Step::PushCommits {
                actor: Actor::Another,
                count: 2,
                branch: MAIN_BRANCH.to_string(),
            },
            Step::RunCli {
                args: format!("update {route}"),
            },
            Step::Assert(Expectation::LastCommandStatus { code: 0 }),
            Step::Assert(Expectation::BundlesUpdated),
            Step::RunCli {
                args: format!("delete {route}"),
            },
            Step::Assert(Expectation::LastCommandStatus { code: 0 }),
            Step::Assert(Expectation::RouteRemoved {
                route: route.to_string(),
            }),
        ];
        Self::new("route lifecycle", steps)
    }
}

/// Runs `scenario` in a fresh world and always tears the world down.
///
/// # Errors
/// Returns error only if the world cannot be created; step failures are
/// reported in [`ScenarioOutcome::result`].
pub async fn run_scenario(settings: &Settings, scenario: &Scenario) -> Result<ScenarioOutcome> {
    let mut world = ScenarioWorld::new(settings)
        .with_context(|| format!("Failed to set up scenario '{}'", scenario.name))?;
    info!("Running scenario '{}'", scenario.name);

    let result = run_steps(&mut world, &scenario.steps).await;
    let teardown = world.cleanup();

    match &result {
        Ok(()) => info!("Scenario '{}' passed", scenario.name),
        Err(err) => warn!("Scenario '{}' failed: {err:#}", scenario.name),
    }
    Ok(ScenarioOutcome {
        name: scenario.name.clone(),
        result,
        teardown,
    })
}

/// Executes `steps` in order against `world`, stopping at the first failure.
///
/// # Errors
/// Returns the first failing step, with its position attached.
pub async fn run_steps(world: &mut ScenarioWorld, steps: &[Step]) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        let number = index + 1;
        step.execute(world)
            .await
            .with_context(|| format!("Step {number}: {step}"))?;
    }
    Ok(())
}
