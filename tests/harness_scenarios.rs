mod support;

use std::fs;

use bundle_harness::http::BasicAuth;
use bundle_harness::{
    Actor, Expectation, Scenario, ScenarioWorld, Step, TeardownAction, run_scenario, run_steps,
};
use tempfile::tempdir;
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{
    DAEMON_STATE_FILE, StateFileProbe, WEB_SERVER_ARGS_FILE, fake_settings, trash_entries,
    write_failing_web_server,
};

#[tokio::test]
async fn route_lifecycle_passes_and_leaves_nothing_behind() {
    let dir = tempdir().unwrap();
    let settings = fake_settings(dir.path()).unwrap();

    let outcome = run_scenario(&settings, &Scenario::route_lifecycle("owner/repo"))
        .await
        .unwrap();

    assert!(outcome.passed(), "{:?}", outcome.result);
    assert!(outcome.teardown.is_clean(), "{:?}", outcome.teardown);
    assert_eq!(trash_entries(&settings), 0);
    assert!(!settings.server_root().unwrap().join("git/owner/repo").exists());
}

#[tokio::test]
async fn failing_step_stops_scenario_and_teardown_deletes_route() {
    let dir = tempdir().unwrap();
    let settings = fake_settings(dir.path()).unwrap();
    let scenario = Scenario::new(
        "fails after init",
        vec![
            Step::NewRemoteRepository {
                main_branch: "main".to_string(),
            },
            Step::InitBundleServer {
                route_prefix: "integration".to_string(),
                route: Some("owner/failing".to_string()),
            },
            Step::Assert(Expectation::LastCommandStatus { code: 0 }),
            Step::RunCli {
                args: "update owner/failing".to_string(),
            },
        ],
    );

    let outcome = run_scenario(&settings, &scenario).await.unwrap();

    let err = outcome.result.unwrap_err();
    assert!(format!("{err:#}").contains("Step 3"), "{err:#}");
    assert!(outcome.teardown.is_clean(), "{:?}", outcome.teardown);
    let layout_root = settings.server_root().unwrap();
    assert!(!layout_root.join("git/owner/failing").exists());
    let routes = fs::read_to_string(layout_root.join("routes")).unwrap();
    assert!(!routes.contains("owner/failing"));
    assert_eq!(trash_entries(&settings), 0);
}

#[tokio::test]
async fn readiness_failure_aborts_before_clone() {
    let dir = tempdir().unwrap();
    let mut settings = fake_settings(dir.path()).unwrap();
    settings.bundle_web_server_command = write_failing_web_server(dir.path()).unwrap();
    let scenario = Scenario::new(
        "broken server",
        vec![
            Step::NewRemoteRepository {
                main_branch: "main".to_string(),
            },
            Step::StartWebServer { port: 8123 },
            Step::CloneRemote { actor: Actor::Me },
        ],
    );

    let outcome = run_scenario(&settings, &scenario).await.unwrap();

    let message = format!("{:#}", outcome.result.unwrap_err());
    assert!(message.contains("Step 2"), "{message}");
    assert!(message.contains("exited before reporting readiness"), "{message}");
    assert!(outcome.teardown.is_clean());
}

#[tokio::test]
async fn update_step_records_output_for_bundle_check() {
    let dir = tempdir().unwrap();
    let settings = fake_settings(dir.path()).unwrap();
    let mut world = ScenarioWorld::new(&settings).unwrap();

    run_steps(
        &mut world,
        &[
            Step::NewRemoteRepository {
                main_branch: "main".to_string(),
            },
            Step::PushCommits {
                actor: Actor::Another,
                count: 1,
                branch: "main".to_string(),
            },
            Step::InitBundleServer {
                route_prefix: "e2e".to_string(),
                route: None,
            },
            Step::UpdateBundleServer,
            Step::Assert(Expectation::BundlesUpdated),
            Step::Assert(Expectation::RouteListed),
        ],
    )
    .await
    .unwrap();

    let route = world.server().route().unwrap().to_string();
    assert!(route.starts_with("e2e/"));
    assert_eq!(world.server().initial_bundle_count(), Some(1));
    assert_eq!(world.server().bundle_count().unwrap(), 2);

    let report = world.cleanup();
    assert!(report.is_clean(), "{report:?}");
    assert!(!world.server().layout().route_exists(&route));
}

#[tokio::test]
async fn daemon_steps_toggle_through_cli() {
    let dir = tempdir().unwrap();
    let settings = fake_settings(dir.path()).unwrap();
    let mut world = ScenarioWorld::new(&settings).unwrap();
    world.set_daemon_probe(Box::new(StateFileProbe {
        path: settings.server_root().unwrap().join(DAEMON_STATE_FILE),
    }));

    run_steps(
        &mut world,
        &[
            Step::Assert(Expectation::DaemonNotRunning),
            Step::DaemonStarted,
            Step::Assert(Expectation::DaemonRunning),
            Step::Assert(Expectation::LastCommandStatus { code: 0 }),
            Step::DaemonNotStarted,
            Step::Assert(Expectation::DaemonNotRunning),
        ],
    )
    .await
    .unwrap();

    let err = run_steps(&mut world, &[Step::Assert(Expectation::DaemonRunning)])
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("daemon is not running"));
}

#[tokio::test]
async fn authenticated_server_serves_bundle_list_only_with_credentials() {
    let dir = tempdir().unwrap();
    let settings = fake_settings(dir.path()).unwrap();
    let http = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/owner/auth"))
        .and(basic_auth("admin", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[bundle]\n\tversion = 1\n"))
        .mount(&http)
        .await;
    Mock::given(method("GET"))
        .and(path("/owner/auth"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&http)
        .await;
    let port = http.address().port();

    let mut world = ScenarioWorld::new(&settings).unwrap();
    run_steps(
        &mut world,
        &[
            Step::NewRemoteRepository {
                main_branch: "main".to_string(),
            },
            Step::InitBundleServer {
                route_prefix: "integration".to_string(),
                route: Some("owner/auth".to_string()),
            },
            Step::WriteAuthConfig {
                username: "admin".to_string(),
                password: "secret".to_string(),
            },
            Step::StartWebServerWithAuth { port },
            Step::Assert(Expectation::BundleListServed {
                auth: Some(BasicAuth::new("admin", "secret")),
                status: 200,
            }),
            Step::Assert(Expectation::BundleListServed {
                auth: None,
                status: 401,
            }),
        ],
    )
    .await
    .unwrap();

    let args = fs::read_to_string(dir.path().join(WEB_SERVER_ARGS_FILE)).unwrap();
    let auth_path = world.auth_config_path();
    assert_eq!(
        args.trim(),
        format!("--port {port} --auth-config {}", auth_path.display())
    );

    let report = world.cleanup();
    assert!(report.is_clean(), "{report:?}");
    assert!(
        !report
            .failures
            .iter()
            .any(|failure| failure.action == TeardownAction::StopWebServer)
    );
}

#[tokio::test]
#[ignore = "requires git-bundle-server binaries; configure with BUNDLE_HARNESS__* variables"]
async fn smoke_clone_with_bundle_uri_against_real_server() {
    let settings = bundle_harness::Settings::new(None).unwrap();
    settings.validate().unwrap();

    let outcome = run_scenario(&settings, &Scenario::smoke(8080, None))
        .await
        .unwrap();

    assert!(outcome.passed(), "{:?}", outcome.result);
    assert!(outcome.teardown.is_clean(), "{:?}", outcome.teardown);
}

#[tokio::test]
async fn bundle_check_reports_missing_and_mismatched_bundle_uri() {
    let dir = tempdir().unwrap();
    let settings = fake_settings(dir.path()).unwrap();
    let mut world = ScenarioWorld::new(&settings).unwrap();
    let check = [Step::Assert(Expectation::BundlesDownloadedAndUsed {
        actor: Actor::Me,
    })];

    run_steps(
        &mut world,
        &[
            Step::NewRemoteRepository {
                main_branch: "main".to_string(),
            },
            Step::PushCommits {
                actor: Actor::Another,
                count: 1,
                branch: "main".to_string(),
            },
            Step::InitBundleServer {
                route_prefix: "integration".to_string(),
                route: Some("owner/used".to_string()),
            },
            Step::StartWebServer { port: 8131 },
            Step::CloneRemote { actor: Actor::Me },
        ],
    )
    .await
    .unwrap();

    let err = run_steps(&mut world, &check).await.unwrap_err();
    assert!(
        format!("{err:#}").contains("'fetch.bundleURI' is not set after clone"),
        "{err:#}"
    );

    let repo = world.repo(Actor::Me).unwrap();
    repo.run_git(["config", "fetch.bundleURI", "http://localhost:1/other"])
        .unwrap()
        .expect_success("git config failed")
        .unwrap();
    let err = run_steps(&mut world, &check).await.unwrap_err();
    let message = format!("{err:#}");
    assert!(
        message.contains("fetch.bundleURI is 'http://localhost:1/other', expected"),
        "{message}"
    );

    let bundle_uri = world.server().bundle_uri().unwrap();
    assert!(bundle_uri.ends_with("/owner/used"), "{bundle_uri}");
    let repo = world.repo(Actor::Me).unwrap();
    repo.run_git(["config", "fetch.bundleURI", bundle_uri.as_str()])
        .unwrap()
        .expect_success("git config failed")
        .unwrap();
    let err = run_steps(&mut world, &check).await.unwrap_err();
    assert!(
        format!("{err:#}").contains("No bundle refs found in the repo"),
        "{err:#}"
    );

    repo_update_ref(&world, "refs/bundles/main", "refs/remotes/origin/main");
    run_steps(&mut world, &check).await.unwrap();

    let report = world.cleanup();
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn bundle_check_fails_when_clone_failed() {
    let dir = tempdir().unwrap();
    let settings = fake_settings(dir.path()).unwrap();
    let missing = dir.path().join("missing.git");
    let scenario = Scenario::new(
        "clone of missing remote",
        vec![
            Step::RemoteRepository {
                url: missing.display().to_string(),
            },
            Step::CloneRemote { actor: Actor::Me },
            Step::Assert(Expectation::BundlesDownloadedAndUsed { actor: Actor::Me }),
        ],
    );

    let outcome = run_scenario(&settings, &scenario).await.unwrap();

    let message = format!("{:#}", outcome.result.unwrap_err());
    assert!(message.contains("Step 3"), "{message}");
    assert!(message.contains("git clone failed"), "{message}");
    assert!(outcome.teardown.is_clean(), "{:?}", outcome.teardown);
}

#[tokio::test]
async fn branch_tip_check_follows_pushes_after_clone() {
    let dir = tempdir().unwrap();
    let settings = fake_settings(dir.path()).unwrap();
    let mut world = ScenarioWorld::new(&settings).unwrap();
    let check = [Step::Assert(Expectation::BranchTipMatches {
        actor: Actor::Me,
        branch: "main".to_string(),
    })];

    run_steps(
        &mut world,
        &[
            Step::NewRemoteRepository {
                main_branch: "main".to_string(),
            },
            Step::PushCommits {
                actor: Actor::Another,
                count: 2,
                branch: "main".to_string(),
            },
            Step::CloneRemote { actor: Actor::Me },
        ],
    )
    .await
    .unwrap();
    run_steps(&mut world, &check).await.unwrap();

    run_steps(
        &mut world,
        &[Step::PushCommits {
            actor: Actor::Another,
            count: 1,
            branch: "main".to_string(),
        }],
    )
    .await
    .unwrap();
    let err = run_steps(&mut world, &check).await.unwrap_err();
    let message = format!("{err:#}");
    let remote_tip = world.remote().unwrap().branch_tip_oid("main").unwrap();
    assert!(message.contains("Me has main at"), "{message}");
    assert!(
        message.contains(&format!("remote has {remote_tip}")),
        "{message}"
    );

    let report = world.cleanup();
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn route_leaves_routes_file_after_cli_delete() {
    let dir = tempdir().unwrap();
    let settings = fake_settings(dir.path()).unwrap();
    let mut world = ScenarioWorld::new(&settings).unwrap();

    let err = run_steps(
        &mut world,
        &[
            Step::NewRemoteRepository {
                main_branch: "main".to_string(),
            },
            Step::InitBundleServer {
                route_prefix: "integration".to_string(),
                route: Some("owner/listed".to_string()),
            },
            Step::Assert(Expectation::RouteListed),
            Step::Assert(Expectation::RouteNotListed),
        ],
    )
    .await
    .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("Step 4"), "{message}");
    assert!(
        message.contains("routes file still lists 'owner/listed'"),
        "{message}"
    );

    run_steps(
        &mut world,
        &[
            Step::RunCli {
                args: "delete owner/listed".to_string(),
            },
            Step::Assert(Expectation::LastCommandStatus { code: 0 }),
            Step::Assert(Expectation::RouteNotListed),
            Step::Assert(Expectation::RouteRemoved {
                route: "owner/listed".to_string(),
            }),
        ],
    )
    .await
    .unwrap();

    let report = world.cleanup();
    assert!(report.is_clean(), "{report:?}");
}

fn repo_update_ref(world: &ScenarioWorld, name: &str, target: &str) {
    world
        .repo(Actor::Me)
        .unwrap()
        .run_git(["update-ref", name, target])
        .unwrap()
        .expect_success("git update-ref failed")
        .unwrap();
}
