// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vsgate::config::Config;
use vsgate::dos::{ArbitratorAddress, ArbitratorSync, HttpArbitrator, SyslogSink};
use vsgate::kubernetes::{crd, wait_for_crds};
use vsgate::reconcilers::ResourceWatcher;
use vsgate::sync::{KubeStatusWriter, NginxReloader, SyncManager};
use vsgate::types::{
    DosLogConf, DosPolicy, DosProtectedResource, ResourceKind, VirtualServer, VirtualServerRoute,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting vsgate controller");

    let config = Config::from_env()?;
    info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        ingress_class = %config.ingress_class,
        conf_root = %config.conf_root.display(),
        dos = config.dos.enabled,
        "Configuration loaded"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let mut crds = vec![crd::VIRTUAL_SERVER, crd::VIRTUAL_SERVER_ROUTE];
    let mut kinds = vec![ResourceKind::VirtualServer, ResourceKind::VirtualServerRoute];
    if config.dos.enabled {
        crds.extend([crd::DOS_POLICY, crd::DOS_LOG_CONF, crd::DOS_PROTECTED_RESOURCE]);
        kinds.extend([
            ResourceKind::DosPolicy,
            ResourceKind::DosLogConf,
            ResourceKind::DosProtectedResource,
        ]);
    }

    info!("Waiting for CRDs to become available...");
    wait_for_crds(&client, &crds).await?;

    let (sync_manager, sync_handle) = SyncManager::new(
        &config,
        Arc::new(KubeStatusWriter::new(client.clone())),
        Arc::new(NginxReloader::new(config.nginx_binary.clone())),
        &kinds,
    );

    let cancel = CancellationToken::new();
    let namespace = config.watch_namespace.clone();
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    tasks.spawn(sync_manager.run());
    tasks.spawn(ResourceWatcher::<VirtualServer>::new(client.clone(), namespace.clone(), sync_handle.clone()).run());
    tasks.spawn(
        ResourceWatcher::<VirtualServerRoute>::new(client.clone(), namespace.clone(), sync_handle.clone()).run(),
    );

    if config.dos.enabled {
        tasks.spawn(ResourceWatcher::<DosPolicy>::new(client.clone(), namespace.clone(), sync_handle.clone()).run());
        tasks.spawn(ResourceWatcher::<DosLogConf>::new(client.clone(), namespace.clone(), sync_handle.clone()).run());
        tasks.spawn(
            ResourceWatcher::<DosProtectedResource>::new(client.clone(), namespace.clone(), sync_handle.clone())
                .run(),
        );

        let address = ArbitratorAddress::from_config(&config.dos);
        info!(arbitrator = %address, "DoS protection enabled");
        let mut arbitrator_sync = ArbitratorSync::new(
            Arc::new(HttpArbitrator::new(&address)?),
            sync_handle.protected_resources(),
            config.dos.sync_interval,
        );
        if let Some(destination) = &config.dos.security_log_destination {
            match SyslogSink::connect(destination, config.unit_hostname.clone()).await {
                Ok(sink) => arbitrator_sync = arbitrator_sync.with_sink(sink),
                Err(e) => warn!(destination = %destination, error = %e, "security log sink unavailable"),
            }
        }
        tasks.spawn(arbitrator_sync.run(cancel.clone()));
    }

    info!("Starting watchers...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
        Some(result) = tasks.join_next() => {
            match result {
                Ok(Ok(())) => warn!("A controller task stopped unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "A controller task failed"),
                Err(e) => error!(error = %e, "A controller task panicked"),
            }
        }
    }

    cancel.cancel();
    tasks.shutdown().await;

    let results = sync_handle.reload_results();
    info!(
        reloads = results.len(),
        average_ms = results.average_duration().map(|d| d.as_millis() as u64).unwrap_or_default(),
        "vsgate stopped"
    );
    Ok(())
}
