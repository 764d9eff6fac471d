//! Registry backed by the `[[services]]` section of the controller config.
//!
//! `list` re-reads the file. `subscribe` watches it and turns the
//! difference between successive listings into events.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::{load_config, ControllerConfig};
use crate::discovery::registry::{EventStream, Registry, RegistryError, RegistryEvent, ServiceListing};
use crate::routing::{EndpointSpec, ServiceId};

pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the file. Watching it rather than the file keeps
    /// the feed alive across saves that rename a new file into place.
    fn watch_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Listing described by a loaded config.
pub fn static_listing(config: &ControllerConfig) -> Vec<ServiceListing> {
    config
        .services
        .iter()
        .map(|service| ServiceListing {
            service: ServiceId::new(&service.name),
            endpoints: service
                .endpoints
                .iter()
                .filter_map(|ep| match ep.address.parse::<SocketAddr>() {
                    Ok(addr) => Some(EndpointSpec::new(addr).with_weight(ep.weight)),
                    Err(_) => {
                        tracing::warn!(service = %service.name, address = %ep.address, "Skipping invalid endpoint address");
                        None
                    }
                })
                .collect(),
        })
        .collect()
}

/// Events turning `previous` into `next`.
pub fn diff_listings(previous: &[ServiceListing], next: &[ServiceListing]) -> Vec<RegistryEvent> {
    let index = |listings: &[ServiceListing]| -> HashMap<ServiceId, HashMap<SocketAddr, EndpointSpec>> {
        listings
            .iter()
            .map(|l| {
                let endpoints = l.endpoints.iter().map(|e| (e.address, e.clone())).collect();
                (l.service.clone(), endpoints)
            })
            .collect()
    };
    let before = index(previous);
    let after = index(next);
    let empty = HashMap::new();

    let mut events = Vec::new();
    for listing in next {
        let old = before.get(&listing.service).unwrap_or(&empty);
        for endpoint in &listing.endpoints {
            if old.get(&endpoint.address) != Some(endpoint) {
                events.push(RegistryEvent::EndpointAdded {
                    service: listing.service.clone(),
                    endpoint: endpoint.clone(),
                });
            }
        }
    }
    for listing in previous {
        let new = after.get(&listing.service).unwrap_or(&empty);
        for endpoint in &listing.endpoints {
            if !new.contains_key(&endpoint.address) {
                events.push(RegistryEvent::EndpointRemoved {
                    service: listing.service.clone(),
                    address: endpoint.address,
                });
            }
        }
    }
    events
}

struct WatchState {
    path: PathBuf,
    changes: mpsc::UnboundedReceiver<()>,
    previous: Vec<ServiceListing>,
    pending: VecDeque<RegistryEvent>,
    // Dropping the watcher ends the change feed
    _watcher: RecommendedWatcher,
}

impl Registry for FileRegistry {
    async fn subscribe(&self) -> Result<EventStream, RegistryError> {
        let (tx, changes) = mpsc::unbounded_channel();
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant {
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.watch_dir(), RecursiveMode::NonRecursive)?;

        let state = WatchState {
            path: self.path.clone(),
            changes,
            previous: self.list().await?,
            pending: VecDeque::new(),
            _watcher: watcher,
        };

        let events = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(event), state));
                }
                state.changes.recv().await?;
                match load_config(&state.path) {
                    Ok(config) => {
                        let next = static_listing(&config);
                        state.pending.extend(diff_listings(&state.previous, &next));
                        state.previous = next;
                    }
                    Err(e) => {
                        tracing::warn!(path = ?state.path, error = %e, "Ignoring unreadable service file");
                    }
                }
            }
        });
        Ok(events.boxed())
    }

    async fn list(&self) -> Result<Vec<ServiceListing>, RegistryError> {
        let config = load_config(&self.path)?;
        Ok(static_listing(&config))
    }
}
