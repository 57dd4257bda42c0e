//! Test doubles shared by the pipeline tests: a scripted build engine, a
//! recording container runtime, and tiny local HTTP and mutual-TLS servers.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use packprobe_common::config::HarnessConfig;
use packprobe_common::constants::EMBEDDED_ENV_PREFIX;
use packprobe_common::error::{PackprobeError, Result};
use packprobe_common::types::{ContainerId, ImageId, LogTranscript};
use packprobe_image::descriptor::{AppliedBuildpack, BuildResult, ImageDescriptor, LayerMetadata};
use packprobe_image::engine::BuildEngine;
use packprobe_image::request::BuildRequest;
use packprobe_runtime::backend::ContainerRuntime;
use packprobe_runtime::container::Container;
use packprobe_runtime::logs::LogCursor;
use packprobe_runtime::request::RunRequest;
use packprobe_sdk::case::Harness;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};

// ── Build engine ─────────────────────────────────────────────────────

/// Returns a canned build result, or fails with the canned transcript.
pub struct FakeEngine {
    pub fail: bool,
    pub builds: Mutex<Vec<(String, BuildRequest)>>,
}

impl FakeEngine {
    pub fn ok() -> Self {
        Self {
            fail: false,
            builds: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            builds: Mutex::new(Vec::new()),
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }
}

pub const PIP_BUILD_LOG: &str = "\
Paketo Buildpack for CA Certificates 3.6.3
  CA Certificates Buildpack
Paketo Buildpack for CPython 1.8.0
  CPython Buildpack
Paketo Buildpack for Pip 0.17.0
  Pip Buildpack
Paketo Buildpack for Pip Install 0.5.0
  Pip Install Buildpack
Paketo Buildpack for Python Start 0.14.0
  Python Start Buildpack
Paketo Buildpack for Procfile 5.6.4
  Procfile Buildpack
Paketo Buildpack for Environment Variables 4.5.2
  Environment Variables Buildpack
Paketo Buildpack for Image Labels 4.5.1
  Image Labels Buildpack
";

/// The descriptor a python build of the pip fixture produces.
pub fn pip_image(name: &str, request: &BuildRequest) -> ImageDescriptor {
    let keys = [
        "paketo-buildpacks/ca-certificates",
        "paketo-buildpacks/cpython",
        "paketo-buildpacks/pip",
        "paketo-buildpacks/pip-install",
        "paketo-buildpacks/python-start",
        "paketo-buildpacks/procfile",
        "paketo-buildpacks/environment-variables",
        "paketo-buildpacks/image-labels",
    ];
    let mut buildpacks: Vec<AppliedBuildpack> = keys
        .iter()
        .map(|k| AppliedBuildpack {
            key: (*k).to_string(),
            version: "1.0.0".into(),
            layers: BTreeMap::new(),
        })
        .collect();

    let variables: serde_json::Map<String, serde_json::Value> = request
        .env()
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(EMBEDDED_ENV_PREFIX)
                .map(|k| (k.to_string(), serde_json::Value::String(v.clone())))
        })
        .collect();
    let mut metadata = serde_json::Map::new();
    let _ = metadata.insert("variables".into(), serde_json::Value::Object(variables));
    let _ = buildpacks[6].layers.insert(
        "environment-variables".into(),
        LayerMetadata {
            launch: true,
            metadata,
            ..LayerMetadata::default()
        },
    );

    ImageDescriptor {
        id: ImageId::new(format!("sha256:{name}")),
        name: name.to_string(),
        buildpacks,
        labels: request.labels().clone(),
    }
}

impl BuildEngine for FakeEngine {
    fn build(&self, name: &str, request: &BuildRequest) -> Result<BuildResult> {
        self.builds
            .lock()
            .unwrap()
            .push((name.to_string(), request.clone()));
        let transcript = LogTranscript::from_output(PIP_BUILD_LOG);
        if self.fail {
            return Err(PackprobeError::Build {
                image: name.to_string(),
                message: "exit status 1".into(),
                transcript,
            });
        }
        Ok(BuildResult {
            image: pip_image(name, request),
            transcript,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

// ── Container runtime ────────────────────────────────────────────────

/// Records every call; containers map their published ports to `host_port`.
#[derive(Default)]
pub struct FakeRuntime {
    pub host_port: u16,
    pub fail_start: bool,
    pub fail_remove: bool,
    /// Successive `logs_since` results; the last one repeats.
    pub logs: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<String>>,
    pub runs: Mutex<Vec<RunRequest>>,
    pub volumes_removed: Mutex<Vec<String>>,
    pub started: AtomicU32,
}

impl FakeRuntime {
    pub fn serving(host_port: u16) -> Self {
        Self {
            host_port,
            ..Self::default()
        }
    }

    pub fn with_logs(self, logs: &[&str]) -> Self {
        *self.logs.lock().unwrap() = logs.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn start(&self, request: &RunRequest) -> Result<Container> {
        self.record(format!("start {}", request.image()));
        self.runs.lock().unwrap().push(request.clone());
        if self.fail_start {
            return Err(PackprobeError::ContainerStart {
                image: request.image().to_string(),
                message: "No such image".into(),
            });
        }
        let n = self.started.fetch_add(1, Ordering::SeqCst);
        let ports = request
            .publish()
            .iter()
            .map(|b| (b.container_port, b.host_port.unwrap_or(self.host_port)))
            .collect();
        Ok(Container::new(
            ContainerId::new(format!("c{n}")),
            request.image().clone(),
            ports,
        ))
    }

    fn logs_since(&self, id: &ContainerId, _since: Option<&LogCursor>) -> Result<LogTranscript> {
        self.record(format!("logs {id}"));
        let mut logs = self.logs.lock().unwrap();
        let text = if logs.len() > 1 {
            logs.remove(0)
        } else {
            logs.first().cloned().unwrap_or_default()
        };
        Ok(LogTranscript::from_output(&text))
    }

    fn stop(&self, id: &ContainerId) -> Result<()> {
        self.record(format!("stop {id}"));
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        self.record(format!("remove {id}"));
        if self.fail_remove {
            return Err(PackprobeError::Runtime {
                operation: "rm",
                message: "device or resource busy".into(),
            });
        }
        Ok(())
    }

    fn remove_image(&self, id: &ImageId) -> Result<()> {
        self.record(format!("remove_image {id}"));
        Ok(())
    }

    fn remove_volumes(&self, names: &[String]) -> Result<()> {
        self.record(format!("remove_volumes {}", names.len()));
        self.volumes_removed
            .lock()
            .unwrap()
            .extend(names.iter().cloned());
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

// ── Harness ──────────────────────────────────────────────────────────

/// Fast timeouts so failing waits finish quickly.
pub fn config(fixture_root: &Path) -> HarnessConfig {
    HarnessConfig {
        fixture_root: fixture_root.to_path_buf(),
        readiness_timeout: Duration::from_secs(3),
        poll_interval: Duration::from_millis(20),
        tls_retry_timeout: Duration::from_secs(3),
        log_timeout: Duration::from_millis(300),
        ..HarnessConfig::default()
    }
}

/// A fixture root holding a `pip` fixture.
pub fn fixture_root() -> tempfile::TempDir {
    let root = tempfile::tempdir().expect("tempdir");
    let pip = root.path().join("pip");
    std::fs::create_dir_all(&pip).expect("mkdir");
    std::fs::write(pip.join("requirements.txt"), "Flask\n").expect("write");
    std::fs::write(pip.join("server.py"), "print('hi')\n").expect("write");
    root
}

/// The fixtures shipped with the workspace.
pub fn testdata() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../testdata")
}

pub fn harness(
    config: HarnessConfig,
    engine: Arc<FakeEngine>,
    runtime: Arc<FakeRuntime>,
) -> Harness {
    Harness::new(config, engine, runtime)
}

// ── HTTP servers ─────────────────────────────────────────────────────

/// Serves `status` and `body` to every connection; returns the port and a
/// counter of requests received.
pub fn http_server(status: u16, body: &'static str) -> (u16, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let served = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&served);
    let _ = std::thread::spawn(move || {
        serve(&listener, status, body, &|_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });
    });
    (port, served)
}

/// Like [`http_server`], but keeps the head of every request received.
pub fn recording_http_server(status: u16, body: &'static str) -> (u16, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&requests);
    let _ = std::thread::spawn(move || {
        serve(&listener, status, body, &|head| {
            sink.lock().unwrap().push(head.to_string());
        });
    });
    (port, requests)
}

/// Reserves a port and starts serving on it only after `delay`.
pub fn delayed_http_server(delay: Duration, body: &'static str) -> u16 {
    let port = free_port();
    let _ = std::thread::spawn(move || {
        std::thread::sleep(delay);
        let listener = TcpListener::bind(("127.0.0.1", port)).expect("bind late");
        serve(&listener, 200, body, &|_| {});
    });
    port
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind")
        .local_addr()
        .expect("addr")
        .port()
}

fn serve(listener: &TcpListener, status: u16, body: &str, on_request: &dyn Fn(&str)) {
    for stream in listener.incoming().flatten() {
        let mut stream = stream;
        let _ = answer(&mut stream, status, body, on_request);
    }
}

/// Reads one request head from `stream` and writes a fixed response.
fn answer<S: Read + Write>(
    stream: &mut S,
    status: u16,
    body: &str,
    on_request: &dyn Fn(&str),
) -> std::io::Result<()> {
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf)?;
    if n == 0 {
        return Ok(());
    }
    on_request(&String::from_utf8_lossy(&buf[..n]));
    let response = format!(
        "HTTP/1.1 {status} Status\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

// ── Mutual-TLS servers ───────────────────────────────────────────────

/// Server settings from the `ca_cert_apps` fixture: the app's `localhost`
/// certificate, and client certificates required to chain to the fixture
/// CA. `tls12_only` pins the protocol to TLS 1.2.
pub fn mutual_tls_config(tls12_only: bool) -> Arc<ServerConfig> {
    let fixture = testdata().join("ca_cert_apps");
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_file_iter(fixture.join("client_certs/ca.pem")).expect("ca.pem") {
        roots.add(cert.expect("ca certificate")).expect("trust anchor");
    }
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .build()
        .expect("client verifier");

    let chain = CertificateDer::pem_file_iter(fixture.join("pip/cert.pem"))
        .expect("cert.pem")
        .collect::<std::result::Result<Vec<_>, _>>()
        .expect("server certificate");
    let key = PrivateKeyDer::from_pem_file(fixture.join("pip/key.pem")).expect("server key");

    let versions: &[&rustls::SupportedProtocolVersion] = if tls12_only {
        &[&rustls::version::TLS12]
    } else {
        &[&rustls::version::TLS13, &rustls::version::TLS12]
    };
    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(versions)
        .expect("protocol versions")
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .expect("server certificate and key");
    Arc::new(config)
}

/// Serves `body` over mutual TLS; returns the port and a counter of
/// requests that completed the handshake.
pub fn mutual_tls_server(config: Arc<ServerConfig>, body: &'static str) -> (u16, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let served = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&served);
    let _ = std::thread::spawn(move || serve_tls(&listener, &config, body, &counter));
    (port, served)
}

/// Reserves a port and starts serving mutual TLS on it only after `delay`.
pub fn delayed_mutual_tls_server(delay: Duration, body: &'static str) -> u16 {
    let port = free_port();
    let config = mutual_tls_config(false);
    let _ = std::thread::spawn(move || {
        std::thread::sleep(delay);
        let listener = TcpListener::bind(("127.0.0.1", port)).expect("bind late");
        serve_tls(&listener, &config, body, &AtomicU32::new(0));
    });
    port
}

fn serve_tls(listener: &TcpListener, config: &Arc<ServerConfig>, body: &str, served: &AtomicU32) {
    for tcp in listener.incoming().flatten() {
        let Ok(conn) = ServerConnection::new(Arc::clone(config)) else {
            continue;
        };
        let mut tls = StreamOwned::new(conn, tcp);
        let answered = answer(&mut tls, 200, body, &|_| {
            let _ = served.fetch_add(1, Ordering::SeqCst);
        });
        if answered.is_ok() {
            tls.conn.send_close_notify();
            let _ = tls.flush();
        }
    }
}
