// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Watcher that forwards custom resource events to the SyncManager.

use crate::sync::{SyncEvent, SyncManagerHandle, WatchedResource};
use crate::types::{
    DosLogConf, DosPolicy, DosProtectedResource, ResourceKey, ResourceKind, VirtualServer, VirtualServerRoute,
};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use kube_runtime::watcher::Config as WatcherConfig;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// A namespaced custom resource the controller watches
pub trait Watched:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ResourceKind;

    fn resource_key(&self) -> ResourceKey;

    fn into_watched(self) -> WatchedResource;
}

macro_rules! watched {
    ($type:ty, $kind:ident) => {
        impl Watched for $type {
            const KIND: ResourceKind = ResourceKind::$kind;

            fn resource_key(&self) -> ResourceKey {
                self.key()
            }

            fn into_watched(self) -> WatchedResource {
                WatchedResource::$kind(self)
            }
        }
    };
}

watched!(VirtualServer, VirtualServer);
watched!(VirtualServerRoute, VirtualServerRoute);
watched!(DosPolicy, DosPolicy);
watched!(DosLogConf, DosLogConf);
watched!(DosProtectedResource, DosProtectedResource);

/// Turns raw watcher events into [`SyncEvent`]s.
///
/// A re-list after a dropped watch delivers the complete set of live objects;
/// objects known from before that are missing from it are reported deleted.
#[derive(Debug)]
struct EventTranslator<K> {
    known: HashSet<ResourceKey>,
    listing: Option<HashSet<ResourceKey>>,
    _kind: PhantomData<K>,
}

impl<K: Watched> EventTranslator<K> {
    fn new() -> Self {
        Self {
            known: HashSet::new(),
            listing: None,
            _kind: PhantomData,
        }
    }

    fn translate(&mut self, event: watcher::Event<K>) -> Vec<SyncEvent> {
        match event {
            watcher::Event::Apply(obj) => {
                self.known.insert(obj.resource_key());
                vec![SyncEvent::Applied(obj.into_watched())]
            }
            watcher::Event::Delete(obj) => {
                let key = obj.resource_key();
                self.known.remove(&key);
                vec![SyncEvent::Deleted(key)]
            }
            watcher::Event::Init => {
                self.listing = Some(HashSet::new());
                vec![]
            }
            watcher::Event::InitApply(obj) => {
                self.listing.get_or_insert_with(HashSet::new).insert(obj.resource_key());
                vec![SyncEvent::Applied(obj.into_watched())]
            }
            watcher::Event::InitDone => {
                let listed = self.listing.take().unwrap_or_default();
                let mut vanished: Vec<ResourceKey> = self.known.difference(&listed).cloned().collect();
                vanished.sort();
                self.known = listed;

                let mut events: Vec<SyncEvent> = vanished.into_iter().map(SyncEvent::Deleted).collect();
                events.push(SyncEvent::InitDone(K::KIND));
                events
            }
        }
    }
}

pub struct ResourceWatcher<K> {
    client: Client,
    namespace: Option<String>,
    sync_handle: SyncManagerHandle,
    _kind: PhantomData<K>,
}

impl<K: Watched> ResourceWatcher<K> {
    pub fn new(client: Client, namespace: Option<String>, sync_handle: SyncManagerHandle) -> Self {
        Self {
            client,
            namespace,
            sync_handle,
            _kind: PhantomData,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let api: Api<K> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        info!(
            kind = %K::KIND,
            namespace = self.namespace.as_deref().unwrap_or("*"),
            "Starting watcher"
        );

        let mut translator = EventTranslator::<K>::new();
        let mut stream = watcher(api, WatcherConfig::default()).default_backoff().boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    for sync_event in translator.translate(event) {
                        self.sync_handle.send(sync_event).await;
                    }
                }
                Err(e) => warn!(kind = %K::KIND, error = %e, "watch error, retrying with backoff"),
            }
        }

        debug!(kind = %K::KIND, "watch stream ended");
        Ok(())
    }
}
