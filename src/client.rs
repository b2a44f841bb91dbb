//! # Kubernetes Clients
//!
//! Builds the hub and managed cluster clients and extracts what the
//! controller needs from their configuration.
//!
//! The hub client watches requests and writes token secrets. The managed
//! client provisions service accounts and mints tokens. When no managed
//! kubeconfig is configured both roles share one connection.

use anyhow::{Context, Result};
use base64::Engine;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::info;

/// A connected client plus the PEM CA bundle of the cluster it talks to
#[derive(Clone)]
pub struct ClusterConnection {
    pub client: Client,
    pub ca_bundle: Option<Vec<u8>>,
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("has_ca_bundle", &self.ca_bundle.is_some())
            .finish_non_exhaustive()
    }
}

/// Connect using an explicit kubeconfig path, or infer the configuration
/// (in-cluster service account, then `$KUBECONFIG`) when none is given
pub async fn connect(kubeconfig: Option<&str>, role: &str) -> Result<ClusterConnection> {
    let config = match kubeconfig {
        Some(path) => {
            info!("Loading {} cluster kubeconfig from {}", role, path);
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read {role} kubeconfig {path}"))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("Failed to load {role} kubeconfig {path}"))?
        }
        None => Config::infer()
            .await
            .with_context(|| format!("Failed to infer {role} cluster configuration"))?,
    };

    let ca_bundle = config.root_cert.as_deref().map(der_certificates_to_pem);
    let client = Client::try_from(config)
        .with_context(|| format!("Failed to create {role} cluster client"))?;

    Ok(ClusterConnection { client, ca_bundle })
}

/// Encode DER certificates as a concatenated PEM bundle
#[must_use]
pub fn der_certificates_to_pem(certificates: &[Vec<u8>]) -> Vec<u8> {
    let mut pem = String::new();
    for der in certificates {
        let encoded = base64::engine::general_purpose::STANDARD.encode(der);
        pem.push_str("-----BEGIN CERTIFICATE-----\n");
        for line in encoded.as_bytes().chunks(64) {
            // base64 output is ASCII
            pem.push_str(&String::from_utf8_lossy(line));
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
    }
    pem.into_bytes()
}

/// HTTP status code carried by a Kubernetes API error, if any
#[must_use]
pub fn api_error_code(error: &kube::Error) -> Option<u16> {
    match error {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}
