//! Pipeline tests against a fake build engine and a recording runtime.
//!
//! Containers "publish" onto local HTTP servers, so readiness and probes
//! exercise real sockets while build and runtime calls stay in memory.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{FakeEngine, FakeRuntime};
use packprobe_common::error::PackprobeError;
use packprobe_common::poll::PollPolicy;
use packprobe_common::types::PullPolicy;
use packprobe_image::cache::cache_volume_names;
use packprobe_image::request::BuildRequest;
use packprobe_runtime::readiness::Liveness;
use packprobe_runtime::request::{PortBinding, RunRequest};
use packprobe_sdk::probe::{ProbeClient, ProbeOptions, ProbeTarget};
use packprobe_sdk::scenario::Scenario;
use serde_json::json;

const GREETING: &str = "Hello, World with pip!";
const CA_LOADED: &str = "Added 1 additional CA certificate(s) to system truststore";

fn pip_request(source: std::path::PathBuf) -> BuildRequest {
    BuildRequest::builder(source)
        .buildpack("paketo-buildpacks/python")
        .pull_policy(PullPolicy::Never)
        .embedded_env("SOME_VARIABLE", "some-value")
        .label("some-label", "some-value")
        .build()
        .expect("valid build request")
}

fn run_request(image: &packprobe_common::types::ImageId) -> RunRequest {
    RunRequest::builder(image.clone())
        .env("PORT", "8080")
        .publish(PortBinding::auto(8080))
        .publish_all()
        .build()
        .expect("valid run request")
}

// ── Happy path ───────────────────────────────────────────────────────

#[test]
fn pip_case_passes_and_tears_down_everything_once() {
    let root = common::fixture_root();
    let (port, served) = common::http_server(200, GREETING);
    let engine = Arc::new(FakeEngine::ok());
    let runtime = Arc::new(FakeRuntime::serving(port));
    let harness = common::harness(common::config(root.path()), engine.clone(), runtime.clone());

    let mut fixture_path = None;
    let report = harness.run_case("pip", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        fixture_path = Some(source.clone());
        assert!(source.join("server.py").exists());

        let build = case.build(pip_request(source))?;
        let expect = case.expect();
        expect.log_contains_lines(
            &build.transcript,
            &["CA Certificates Buildpack", "Pip Install Buildpack", "Image Labels Buildpack"],
        );
        expect.buildpack_key(&build.image, 6, "paketo-buildpacks/environment-variables");
        expect.layer_metadata(
            &build.image,
            6,
            "environment-variables",
            "variables",
            &json!({"SOME_VARIABLE": "some-value"}),
        );
        expect.label(&build.image, "some-label", "some-value");

        let container = case.start(run_request(&build.image.id))?;
        let ready = case.wait_until_ready(&container, &Liveness::Tcp)?;
        let response = case.probe(&ready, 8080, &ProbeOptions::http("/"))?;
        case.expect().status(&response, 200);
        case.expect().body_contains(&response, GREETING);
        Ok(())
    });

    assert!(report.passed(), "{:?}", report.verdict);
    assert!(report.is_clean());
    assert_eq!(engine.build_count(), 1);
    assert_eq!(runtime.count("start"), 1);
    assert_eq!(runtime.count("stop"), 1);
    assert_eq!(runtime.count("remove"), 1);
    assert_eq!(runtime.count("remove_image"), 1);
    assert_eq!(
        *runtime.volumes_removed.lock().unwrap(),
        cache_volume_names(&report.name)
    );
    assert!(served.load(Ordering::SeqCst) >= 1);
    assert!(!fixture_path.expect("fixture resolved").exists());
}

#[test]
fn teardown_runs_container_then_image() {
    let root = common::fixture_root();
    let (port, _) = common::http_server(200, GREETING);
    let runtime = Arc::new(FakeRuntime::serving(port));
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        runtime.clone(),
    );

    let report = harness.run_case("order", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        let _ = case.start(run_request(&build.image.id))?;
        Ok(())
    });

    assert!(report.passed());
    let ops: Vec<String> = runtime
        .calls()
        .iter()
        .map(|c| c.split(' ').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(ops, ["start", "stop", "remove", "remove_image", "remove_volumes"]);
}

#[test]
fn pip_scenario_file_runs_end_to_end() {
    let root = common::fixture_root();
    let (port, _) = common::http_server(200, GREETING);
    let engine = Arc::new(FakeEngine::ok());
    let runtime = Arc::new(FakeRuntime::serving(port));
    let harness = common::harness(common::config(root.path()), engine.clone(), runtime.clone());

    let scenario =
        Scenario::from_yaml(include_str!("../../../scenarios/pip.yaml")).expect("scenario");
    let report = scenario.run(&harness);

    assert!(report.passed(), "{:?}", report.verdict);
    let builds = engine.builds.lock().unwrap();
    let (_, request) = &builds[0];
    assert_eq!(request.buildpacks(), ["paketo-buildpacks/python"]);
    assert_eq!(request.engine_env()["BP_IMAGE_LABELS"], "some-label=some-value");
    assert_eq!(runtime.count("stop"), 1);
}

// ── Failure paths ────────────────────────────────────────────────────

#[test]
fn assertion_failures_are_collected_and_teardown_still_runs_once() {
    let root = common::fixture_root();
    let (port, _) = common::http_server(500, "Internal Server Error");
    let runtime = Arc::new(FakeRuntime::serving(port));
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        runtime.clone(),
    );

    let report = harness.run_case("mismatch", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        case.expect().label(&build.image, "some-label", "other-value");
        case.expect().log_contains_lines(&build.transcript, &["Poetry Buildpack"]);

        let container = case.start(run_request(&build.image.id))?;
        let ready = case.wait_until_ready(&container, &Liveness::Tcp)?;
        let response = case.probe(&ready, 8080, &ProbeOptions::http("/"))?;
        case.expect().status(&response, 200);
        case.expect().body_contains(&response, GREETING);
        Ok(())
    });

    match report.verdict {
        Err(PackprobeError::Assertion(ref mismatches)) => {
            assert_eq!(mismatches.len(), 4);
            assert!(mismatches.iter().any(|m| m.actual.starts_with("500")));
        }
        ref other => panic!("expected assertion failure, got {other:?}"),
    }
    assert_eq!(runtime.count("stop"), 1);
    assert_eq!(runtime.count("remove"), 1);
}

#[test]
fn build_failure_aborts_but_removes_cache_volumes() {
    let root = common::fixture_root();
    let runtime = Arc::new(FakeRuntime::serving(common::free_port()));
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::failing()),
        runtime.clone(),
    );

    let report = harness.run_case("build-fails", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let _ = case.build(pip_request(source))?;
        unreachable!("build must fail");
    });

    match &report.verdict {
        Err(PackprobeError::Build { transcript, .. }) => {
            assert!(transcript.contains_line("Pip Buildpack"));
        }
        other => panic!("expected build failure, got {other:?}"),
    }
    assert_eq!(runtime.count("start"), 0);
    assert_eq!(runtime.count("stop"), 0);
    assert_eq!(runtime.count("remove_volumes"), 1);
    assert_eq!(
        runtime.calls().iter().find(|c| c.starts_with("remove_image")),
        Some(&format!("remove_image {}", report.name))
    );
}

#[test]
fn start_failure_skips_container_teardown() {
    let root = common::fixture_root();
    let runtime = Arc::new(FakeRuntime {
        fail_start: true,
        ..FakeRuntime::default()
    });
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        runtime.clone(),
    );

    let report = harness.run_case("start-fails", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        let _ = case.start(run_request(&build.image.id))?;
        Ok(())
    });

    assert!(matches!(report.verdict, Err(PackprobeError::ContainerStart { .. })));
    assert_eq!(runtime.count("stop"), 0);
    assert_eq!(runtime.count("remove"), 0);
    assert_eq!(runtime.count("remove_image"), 1);
}

#[test]
fn missing_fixture_touches_nothing() {
    let root = common::fixture_root();
    let runtime = Arc::new(FakeRuntime::default());
    let engine = Arc::new(FakeEngine::ok());
    let harness = common::harness(common::config(root.path()), engine.clone(), runtime.clone());

    let report = harness.run_case("no-fixture", |case| {
        let _ = case.fixture("poetry")?;
        Ok(())
    });

    assert!(matches!(report.verdict, Err(PackprobeError::FixtureNotFound { .. })));
    assert_eq!(engine.build_count(), 0);
    assert!(runtime.calls().is_empty());
}

#[test]
fn panic_in_case_body_still_tears_down() {
    let root = common::fixture_root();
    let runtime = Arc::new(FakeRuntime::serving(common::free_port()));
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        runtime.clone(),
    );

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        harness.run_case("panics", |case| {
            let source = case.fixture("pip")?.path().to_path_buf();
            let build = case.build(pip_request(source))?;
            let _ = case.start(run_request(&build.image.id))?;
            panic!("unexpected response shape");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(runtime.count("stop"), 1);
    assert_eq!(runtime.count("remove"), 1);
    assert_eq!(runtime.count("remove_image"), 1);
    assert_eq!(runtime.count("remove_volumes"), 1);
}

#[test]
fn teardown_error_is_reported_without_overturning_a_pass() {
    let root = common::fixture_root();
    let runtime = Arc::new(FakeRuntime {
        host_port: common::free_port(),
        fail_remove: true,
        ..FakeRuntime::default()
    });
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        runtime.clone(),
    );

    let report = harness.run_case("teardown-fails", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        let _ = case.start(run_request(&build.image.id))?;
        Ok(())
    });

    assert!(report.passed());
    assert!(!report.is_clean());
    assert_eq!(report.teardown_errors.len(), 1);
    assert!(matches!(report.teardown_errors[0], PackprobeError::Teardown { .. }));
    assert_eq!(runtime.count("remove"), 1);
}

#[test]
fn case_error_is_authoritative_over_recorded_mismatches() {
    let root = common::fixture_root();
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        Arc::new(FakeRuntime {
            fail_start: true,
            ..FakeRuntime::default()
        }),
    );

    let report = harness.run_case("both", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        case.expect().label(&build.image, "missing", "x");
        let _ = case.start(run_request(&build.image.id))?;
        Ok(())
    });

    assert!(matches!(report.verdict, Err(PackprobeError::ContainerStart { .. })));
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].subject, "label \"missing\"");
}

#[test]
fn mismatches_recorded_before_an_abort_are_kept_in_the_report() {
    let root = common::fixture_root();
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        Arc::new(FakeRuntime::default()),
    );

    let report = harness.run_case("abort-after-mismatch", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        case.expect().label(&build.image, "some-label", "other-value");
        let _ = case.fixture("does-not-exist")?;
        Ok(())
    });

    assert!(matches!(report.verdict, Err(PackprobeError::FixtureNotFound { .. })));
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].expected, "\"other-value\"");
    assert_eq!(report.mismatches[0].actual, "\"some-value\"");
}

#[test]
fn keep_container_leaves_it_running() {
    let root = common::fixture_root();
    let runtime = Arc::new(FakeRuntime::serving(common::free_port()));
    let mut config = common::config(root.path());
    config.keep_container = true;
    config.keep_image = true;
    let harness = common::harness(config, Arc::new(FakeEngine::ok()), runtime.clone());

    let report = harness.run_case("keep", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        let _ = case.start(run_request(&build.image.id))?;
        Ok(())
    });

    assert!(report.is_clean());
    assert_eq!(runtime.calls().len(), 1, "{:?}", runtime.calls());
}

// ── Readiness ────────────────────────────────────────────────────────

#[test]
fn zero_readiness_timeout_fails_against_a_slow_binder() {
    let root = common::fixture_root();
    let runtime = Arc::new(FakeRuntime::serving(common::free_port()));
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        runtime.clone(),
    );

    let report = harness.run_case("slow", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        let container = case.start(run_request(&build.image.id))?;
        let _ = case.wait_until_ready_within(&container, &Liveness::Tcp, Duration::ZERO)?;
        Ok(())
    });

    assert!(matches!(
        report.verdict,
        Err(PackprobeError::ReadinessTimeout { attempts: 1, .. })
    ));
    assert_eq!(runtime.count("stop"), 1);
}

#[test]
fn probing_an_unpublished_port_is_a_usage_error() {
    let root = common::fixture_root();
    let (port, _) = common::http_server(200, GREETING);
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        Arc::new(FakeRuntime::serving(port)),
    );

    let report = harness.run_case("unpublished", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        let container = case.start(run_request(&build.image.id))?;
        let ready = case.wait_until_ready(&container, &Liveness::Tcp)?;
        let _ = case.probe(&ready, 9090, &ProbeOptions::http("/"))?;
        Ok(())
    });

    assert!(matches!(report.verdict, Err(PackprobeError::NotFound { .. })));
}

// ── Container logs ───────────────────────────────────────────────────

#[test]
fn container_log_eventually_contains_truststore_line() {
    let root = common::fixture_root();
    let runtime = Arc::new(
        FakeRuntime::serving(common::free_port()).with_logs(&[
            "",
            "Loading service bindings",
            &format!("Loading service bindings\n{CA_LOADED}"),
        ]),
    );
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        runtime.clone(),
    );

    let report = harness.run_case("ca-cert", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        let container = case.start(run_request(&build.image.id))?;
        assert!(case.eventually_log_contains(&container, None, CA_LOADED));
        Ok(())
    });

    assert!(report.passed(), "{:?}", report.verdict);
    assert_eq!(runtime.count("logs"), 3);
}

#[test]
fn container_log_that_never_matches_times_out_as_a_mismatch() {
    let root = common::fixture_root();
    let runtime = Arc::new(FakeRuntime::serving(common::free_port()).with_logs(&["booting"]));
    let harness = common::harness(
        common::config(root.path()),
        Arc::new(FakeEngine::ok()),
        runtime.clone(),
    );

    let started = Instant::now();
    let report = harness.run_case("ca-cert-missing", |case| {
        let source = case.fixture("pip")?.path().to_path_buf();
        let build = case.build(pip_request(source))?;
        let container = case.start(run_request(&build.image.id))?;
        assert!(!case.eventually_log_contains(&container, None, CA_LOADED));
        Ok(())
    });

    assert!(started.elapsed() < Duration::from_secs(3));
    match report.verdict {
        Err(PackprobeError::Assertion(ref m)) => {
            assert_eq!(m.len(), 1);
            assert!(m[0].actual.contains("booting"));
        }
        ref other => panic!("expected assertion failure, got {other:?}"),
    }
    assert_eq!(runtime.count("stop"), 1);
}

// ── Probes ───────────────────────────────────────────────────────────

#[test]
fn plain_probe_makes_exactly_one_request() {
    let (port, served) = common::http_server(503, "starting");
    let client = ProbeClient::new(ProbeOptions::http("/")).expect("client");
    let result = client.probe(&ProbeTarget::localhost(port)).expect("response");

    assert_eq!(result.status, 503);
    assert_eq!(result.attempts, 1);
    assert_eq!(served.load(Ordering::SeqCst), 1);
}

#[test]
fn plain_probe_does_not_retry_a_refused_connection() {
    let port = common::free_port();
    let client = ProbeClient::new(ProbeOptions::http("/")).expect("client");
    let err = client.probe(&ProbeTarget::localhost(port)).unwrap_err();
    assert!(matches!(err, PackprobeError::Probe { .. }));
}

#[test]
fn retrying_probe_succeeds_once_the_server_appears() {
    let port = common::delayed_http_server(Duration::from_millis(300), GREETING);
    let options = ProbeOptions::http("/").retry(PollPolicy::new(
        Duration::from_millis(50),
        Duration::from_secs(5),
    ));
    let result = ProbeClient::new(options)
        .expect("client")
        .probe(&ProbeTarget::localhost(port))
        .expect("eventually answered");

    assert_eq!(result.status, 200);
    assert!(result.attempts > 1);
    assert!(result.text().contains(GREETING));
}

#[test]
fn retrying_probe_gives_up_at_the_deadline() {
    let port = common::free_port();
    let options = ProbeOptions::http("/").retry(PollPolicy::new(
        Duration::from_millis(20),
        Duration::from_millis(200),
    ));
    let started = Instant::now();
    let err = ProbeClient::new(options)
        .expect("client")
        .probe(&ProbeTarget::localhost(port))
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(matches!(err, PackprobeError::Probe { .. }));
}

#[test]
fn probe_sends_configured_headers() {
    let (port, requests) = common::recording_http_server(200, "ok");
    let options = ProbeOptions::http("/health").header("X-Case", "pip");
    let result = ProbeClient::new(options)
        .expect("client")
        .probe(&ProbeTarget::localhost(port))
        .expect("response");

    assert_eq!(result.url, format!("http://localhost:{port}/health"));
    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let head = requests[0].to_ascii_lowercase();
    assert!(head.starts_with("get /health http/1.1\r\n"), "{head}");
    assert!(head.contains("\r\nx-case: pip\r\n"), "{head}");
}
