//! # Managed Service Account Controller
//!
//! Runs on behalf of one managed cluster. Watches `ManagedServiceAccount`
//! requests in the hub namespace named after that cluster and, for each one:
//!
//! 1. **Ensures the identity** - a `ServiceAccount` in the install namespace of the managed cluster
//! 2. **Mints a token** - through the TokenRequest API, bounded by the requested validity
//! 3. **Publishes the token** - into a hub secret owned by the request, with the managed CA bundle
//! 4. **Reports** - `SecretCreated` and then `TokenReported`, never the other way round
//! 5. **Rotates and self-heals** - re-mints before expiry and when the secret goes missing
//!
//! Configuration comes from environment variables (see `config`).

use anyhow::Result;
use managed_serviceaccount::runtime::initialization::initialize;
use managed_serviceaccount::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.requests,
        init.secrets,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await
}
