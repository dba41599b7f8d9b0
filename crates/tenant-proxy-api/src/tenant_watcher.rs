//! Tenant watcher
//!
//! Keeps a [`TenantStore`] in sync with the `Tenant` resources of the
//! cluster. The store is rebuilt from the reflector cache after the initial
//! list completes and on every later change, so readers never observe a
//! partially listed set of tenants.

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::reflector::Store;
use kube::runtime::watcher::Event;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tenant_proxy_common::crd::Tenant;

use crate::tenant::TenantStore;

/// Watch `Tenant` resources until `shutdown` is cancelled
pub async fn watch_tenants(client: Client, store: Arc<TenantStore>, shutdown: CancellationToken) {
    let api: Api<Tenant> = Api::all(client);
    let (reader, writer) = reflector::store();

    // Shorter than the client read timeout so the server closes the watch first
    let config = watcher::Config::default().timeout(25);
    let stream = reflector(writer, watcher(api, config)).default_backoff();
    let mut stream = std::pin::pin!(stream);

    info!("Tenant watcher started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Tenant watcher stopped");
                return;
            }
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    if needs_refresh(&event) {
                        refresh(&store, &reader);
                    }
                }
                Some(Err(e)) => warn!(error = %e, "Tenant watch error, will retry"),
                None => {
                    warn!("Tenant watch stream ended");
                    return;
                }
            },
        }
    }
}

/// Whether the event completes a consistent view of the tenants
fn needs_refresh(event: &Event<Tenant>) -> bool {
    match event {
        Event::Init | Event::InitApply(_) => false,
        Event::InitDone | Event::Apply(_) | Event::Delete(_) => true,
    }
}

/// Rebuild the store from the reflector cache
fn refresh(store: &TenantStore, reader: &Store<Tenant>) {
    let tenants = reader.state();
    let rejected = store.replace_from_resources(tenants.iter().map(|t| t.as_ref()));

    if rejected.is_empty() {
        debug!(tenants = tenants.len(), "Tenant snapshot refreshed");
    } else {
        info!(
            tenants = tenants.len() - rejected.len(),
            rejected = rejected.len(),
            "Tenant snapshot refreshed with rejected tenants"
        );
    }
}
