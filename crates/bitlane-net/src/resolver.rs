//! Asynchronous name resolution.
//!
//! `resolve` starts a detached worker thread that calls the blocking system
//! resolver; `update` polls the completion channels and transitions entries
//! to succeeded or failed. Results are cached by name for the resolver's
//! lifetime, so resolving an already-known name is a no-op. The resolver
//! owns its entries; `clear` (and drop) frees them, and any worker still
//! running simply sends into a closed channel.

use std::{collections::HashMap, net::ToSocketAddrs, thread};

use bitlane_core::TimeBase;
use crossbeam_channel::{Receiver, TryRecvError};
use tracing::warn;

use crate::address::Address;

/// State of one name's resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    /// A worker thread is still resolving the name.
    InProgress,
    /// Resolution produced at least one address.
    Succeeded,
    /// Resolution failed or produced nothing.
    Failed,
}

/// Cached result for one name. Callers borrow entries via
/// [`DnsResolver::get_entry`]; the resolver owns them.
#[derive(Debug, Clone)]
pub struct ResolveEntry {
    /// Current status of the lookup.
    pub status: ResolveStatus,
    /// Resolved addresses, empty until the lookup succeeds.
    pub addresses: Vec<Address>,
}

/// Asynchronous name → address resolver.
#[derive(Debug)]
pub struct DnsResolver {
    entries: HashMap<String, ResolveEntry>,
    pending: HashMap<String, Receiver<Vec<Address>>>,
}

impl DnsResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self { entries: HashMap::new(), pending: HashMap::new() }
    }

    /// Starts resolving `name`. A no-op if the name is already known, in
    /// progress or completed.
    pub fn resolve(&mut self, name: &str) {
        if self.entries.contains_key(name) {
            return;
        }

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let owned = name.to_owned();
        thread::spawn(move || {
            let addresses = resolve_blocking(&owned);
            let _ = sender.send(addresses);
        });

        self.entries.insert(
            name.to_owned(),
            ResolveEntry { status: ResolveStatus::InProgress, addresses: Vec::new() },
        );
        self.pending.insert(name.to_owned(), receiver);
    }

    /// Polls in-progress lookups and settles completed ones. Call once per
    /// tick.
    pub fn update(&mut self, _time_base: &TimeBase) {
        let mut finished: Vec<(String, Option<Vec<Address>>)> = Vec::new();
        self.pending.retain(|name, receiver| match receiver.try_recv() {
            Ok(addresses) => {
                finished.push((name.clone(), Some(addresses)));
                false
            }
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Disconnected) => {
                finished.push((name.clone(), None));
                false
            }
        });

        for (name, result) in finished {
            if let Some(entry) = self.entries.get_mut(&name) {
                match result {
                    Some(addresses) if !addresses.is_empty() => {
                        entry.status = ResolveStatus::Succeeded;
                        entry.addresses = addresses;
                    }
                    _ => {
                        entry.status = ResolveStatus::Failed;
                        warn!(name = %name, "name resolution failed");
                    }
                }
            }
        }
    }

    /// Returns the cached entry for `name`, if resolution was requested.
    pub fn get_entry(&self, name: &str) -> Option<&ResolveEntry> {
        self.entries.get(name)
    }

    /// Drops the cache. In-flight workers finish into closed channels.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking system resolution. Accepts a literal address, `host`, or
/// `host:port`.
fn resolve_blocking(name: &str) -> Vec<Address> {
    if let Ok(address) = name.parse::<Address>() {
        return vec![address];
    }

    let (host, port) = match name.rsplit_once(':') {
        Some((host, port_str)) if !host.is_empty() => match port_str.parse::<u16>() {
            Ok(port) => (host, port),
            Err(_) => (name, 0),
        },
        _ => (name, 0),
    };

    match (host, port).to_socket_addrs() {
        Ok(addresses) => addresses.map(Address::from).collect(),
        Err(_) => Vec::new(),
    }
}
