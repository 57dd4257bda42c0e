//! HTTP and mutual-TLS probes against published container ports.
//!
//! A plain probe is a single request: once the container is ready, a
//! failure is a genuine failure. A probe with a retry policy keeps issuing
//! the request until the TLS handshake and HTTP exchange both succeed or
//! the policy's deadline passes; mutual-TLS probes need this because the
//! container may load its extra CA certificates after it starts listening.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use packprobe_common::constants::PROBE_REQUEST_TIMEOUT;
use packprobe_common::error::{PackprobeError, Result};
use packprobe_common::poll::{self, PollPolicy};
use reqwest::blocking::Client;
use reqwest::tls::{Certificate, Identity, Version};
use serde::{Deserialize, Serialize};

/// URL scheme of a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

/// Client certificate and private key presented during the TLS handshake.
#[derive(Clone)]
pub struct ClientIdentity {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl ClientIdentity {
    /// Creates an identity from PEM-encoded certificate chain and key.
    #[must_use]
    pub const fn from_pem(cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Self {
        Self { cert_pem, key_pem }
    }

    fn to_identity(&self) -> Result<Identity> {
        let mut pem = self.cert_pem.clone();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&self.key_pem);
        Identity::from_pem(&pem).map_err(|e| PackprobeError::Config {
            message: format!("invalid client certificate or key: {e}"),
        })
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// How to issue a probe.
#[derive(Debug, Clone, Default)]
pub struct ProbeOptions {
    /// URL scheme.
    pub scheme: Scheme,
    /// Request path, starting with `/`.
    pub path: String,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Client certificate for mutual TLS.
    pub client_identity: Option<ClientIdentity>,
    /// PEM bundle that replaces the system trust roots.
    pub trust_root: Option<Vec<u8>>,
    /// Keep retrying until success or this policy's deadline.
    pub retry: Option<PollPolicy>,
}

impl ProbeOptions {
    /// A single plain HTTP `GET` of `path`.
    #[must_use]
    pub fn http(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// A single HTTPS `GET` of `path`.
    #[must_use]
    pub fn https(path: impl Into<String>) -> Self {
        Self {
            scheme: Scheme::Https,
            path: path.into(),
            ..Self::default()
        }
    }

    /// An HTTPS `GET` presenting a client certificate, trusting only
    /// `trust_root`, and retrying under `retry`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if any of the PEM files cannot be read.
    pub fn mutual_tls_from_files(
        path: impl Into<String>,
        client_cert: &Path,
        client_key: &Path,
        trust_root: &Path,
        retry: PollPolicy,
    ) -> Result<Self> {
        Ok(Self::https(path)
            .client_identity(ClientIdentity::from_pem(
                read_pem(client_cert)?,
                read_pem(client_key)?,
            ))
            .trust_root(read_pem(trust_root)?)
            .retry(retry))
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(name.into(), value.into());
        self
    }

    /// Presents `identity` during the handshake.
    #[must_use]
    pub fn client_identity(mut self, identity: ClientIdentity) -> Self {
        self.client_identity = Some(identity);
        self
    }

    /// Trusts only the certificates in `pem`.
    #[must_use]
    pub fn trust_root(mut self, pem: Vec<u8>) -> Self {
        self.trust_root = Some(pem);
        self
    }

    /// Retries failed attempts under `policy`.
    #[must_use]
    pub const fn retry(mut self, policy: PollPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| PackprobeError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Host and port a probe is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ProbeTarget {
    /// Targets `port` on localhost.
    ///
    /// The name `localhost` rather than an address is used so server
    /// certificates issued for `localhost` verify.
    #[must_use]
    pub fn localhost(port: u16) -> Self {
        Self {
            host: "localhost".to_string(),
            port,
        }
    }

    /// Builds the URL for `scheme` and `path`.
    #[must_use]
    pub fn url(&self, scheme: Scheme, path: &str) -> String {
        let sep = if path.starts_with('/') { "" } else { "/" };
        format!("{scheme}://{}:{}{sep}{path}", self.host, self.port)
    }
}

/// Response observed by a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// URL that answered.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
    /// Attempts made before this response.
    pub attempts: u32,
}

impl ProbeResult {
    /// Returns the body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Issues probes with a fixed TLS and retry configuration.
#[derive(Debug)]
pub struct ProbeClient {
    client: Client,
    options: ProbeOptions,
}

impl ProbeClient {
    /// Builds a client for `options`.
    ///
    /// The minimum TLS version is 1.2. When a trust root is supplied the
    /// built-in roots are disabled.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the certificate material is unusable.
    pub fn new(options: ProbeOptions) -> Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .min_tls_version(Version::TLS_1_2)
            .timeout(PROBE_REQUEST_TIMEOUT)
            .no_proxy();

        if let Some(bundle) = &options.trust_root {
            let certs =
                Certificate::from_pem_bundle(bundle).map_err(|e| PackprobeError::Config {
                    message: format!("invalid trust root bundle: {e}"),
                })?;
            if certs.is_empty() {
                return Err(PackprobeError::Config {
                    message: "trust root bundle contains no PEM certificates".to_string(),
                });
            }
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        if let Some(identity) = &options.client_identity {
            builder = builder.identity(identity.to_identity()?);
        }

        let client = builder.build().map_err(|e| PackprobeError::Config {
            message: format!("cannot build probe client: {e}"),
        })?;
        Ok(Self { client, options })
    }

    /// Returns the options this client was built with.
    #[must_use]
    pub const fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Sends the configured request to `target`.
    ///
    /// Any HTTP response counts as a completed exchange; status and body
    /// are left to the assertion layer.
    ///
    /// # Errors
    ///
    /// Returns `Probe` on a transport or TLS failure, after exhausting the
    /// retry policy if one is configured.
    pub fn probe(&self, target: &ProbeTarget) -> Result<ProbeResult> {
        let url = target.url(self.options.scheme, &self.options.path);
        tracing::info!(url = %url, retry = self.options.retry.is_some(), "probing");

        let outcome = match self.options.retry {
            None => self.send_once(&url).map(|r| (r, 1)).map_err(|e| (e, 1)),
            Some(policy) => {
                let mut attempts = 0u32;
                poll::until(policy, || {
                    attempts += 1;
                    self.send_once(&url)
                })
                .map(|r| (r, attempts))
                .map_err(|elapsed| {
                    (
                        format!("{} (after {:?})", elapsed.last_error, elapsed.waited),
                        elapsed.attempts,
                    )
                })
            }
        };

        match outcome {
            Ok(((status, body), attempts)) => {
                tracing::info!(url = %url, status, attempts, "probe answered");
                Ok(ProbeResult {
                    url,
                    status,
                    body,
                    attempts,
                })
            }
            Err((message, attempts)) => {
                tracing::warn!(url = %url, attempts, error = %message, "probe failed");
                Err(PackprobeError::Probe { url, message })
            }
        }
    }

    fn send_once(&self, url: &str) -> std::result::Result<(u16, Vec<u8>), String> {
        let mut request = self.client.get(url);
        for (name, value) in &self.options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().map_err(|e| describe(&e))?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(|e| describe(&e))?;
        Ok((status, body.to_vec()))
    }
}

/// Renders an error with its source chain; TLS failures hide the useful
/// part in the sources.
fn describe(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        text.push_str(": ");
        text.push_str(&s.to_string());
        source = s.source();
    }
    text
}
