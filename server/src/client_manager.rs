//! Connected clients and participant identity allocation
//!
//! This module keeps track of every open connection and which roster
//! identity, if any, it was granted:
//! - Connection lifecycle (connect, join, disconnect)
//! - Identity allocation against the race roster and phase
//! - Releasing an identity so a later connection can take it
//!
//! Identities are only granted while the race accepts participants. A freed
//! identity goes back to the pool and is handed out again in roster order.

use crate::error::AllocationError;
use crate::race::Race;
use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// An open connection and the identity it holds
#[derive(Debug)]
pub struct Client {
    /// Connection identifier assigned when the socket was accepted
    pub id: u64,
    /// Peer address, used in log output
    pub addr: SocketAddr,
    pub connected_at: Instant,
    /// Roster identity granted to a participant; spectators hold none
    pub source_id: Option<u32>,
}

impl Client {
    pub fn new(id: u64, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            source_id: None,
        }
    }

    pub fn is_participant(&self) -> bool {
        self.source_id.is_some()
    }
}

/// Grants the first roster identity that has no boat in the race.
///
/// The boat is added to the race before the identity is returned, so two
/// requests can never be granted the same identity while the caller holds
/// the race lock.
pub fn allocate_identity(race: &mut Race) -> Result<u32, AllocationError> {
    if !race.is_joining_open() {
        return Err(AllocationError::JoiningClosed(race.status()));
    }

    let source_id = race
        .roster()
        .iter()
        .map(|definition| definition.source_id)
        .find(|id| race.boat(*id).is_none())
        .ok_or(AllocationError::RosterExhausted)?;

    race.add_boat(source_id)?;
    Ok(source_id)
}

/// Tracks every connected client
///
/// The manager is shared between connection tasks behind an
/// `Arc<RwLock<ClientManager>>`. Whenever it is locked together with the race,
/// the manager lock is taken first.
#[derive(Debug, Default)]
pub struct ClientManager {
    clients: HashMap<u64, Client>,
    next_client_id: u64,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted connection and returns its identifier
    pub fn add_client(&mut self, addr: SocketAddr) -> u64 {
        self.next_client_id += 1;
        let id = self.next_client_id;
        self.clients.insert(id, Client::new(id, addr));
        info!("Client {} connected from {}", id, addr);
        id
    }

    /// Allocates a participant identity for `client_id`
    ///
    /// A client asking twice keeps the identity it already holds.
    pub fn allocate(&mut self, client_id: u64, race: &mut Race) -> Result<u32, AllocationError> {
        if let Some(source_id) = self.participant(client_id) {
            return Ok(source_id);
        }

        let source_id = allocate_identity(race)?;
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.source_id = Some(source_id);
                info!("Client {} is sailing boat {}", client_id, source_id);
            }
            None => debug!(
                "Boat {} allocated for unregistered client {}",
                source_id, client_id
            ),
        }
        Ok(source_id)
    }

    /// Returns the client's identity to the pool and removes its boat
    pub fn release(&mut self, client_id: u64, race: &mut Race) -> Option<u32> {
        let source_id = self.clients.get_mut(&client_id)?.source_id.take()?;
        race.remove_boat(source_id);
        info!("Client {} released boat {}", client_id, source_id);
        Some(source_id)
    }

    pub fn remove_client(&mut self, client_id: u64) -> Option<Client> {
        let client = self.clients.remove(&client_id)?;
        info!(
            "Client {} ({}) disconnected after {:?}; {} connected, {} sailing",
            client_id,
            client.addr,
            client.connected_at.elapsed(),
            self.len(),
            self.participant_count()
        );
        Some(client)
    }

    pub fn participant(&self, client_id: u64) -> Option<u32> {
        self.clients.get(&client_id).and_then(|c| c.source_id)
    }

    fn participant_count(&self) -> usize {
        self.clients.values().filter(|c| c.is_participant()).count()
    }

    fn len(&self) -> usize {
        self.clients.len()
    }
}
