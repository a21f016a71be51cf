//! Connected participants and their public identity.
//!
//! The server owns the authoritative roster; each client mirrors it for every
//! *other* participant. Every mutation touches exactly one entry, so a single
//! `RwLock` around the map is enough for transport threads and user threads
//! to share it.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::core::types::Color32;
use crate::utils::sync::{read_lock, write_lock};

/// Small integer identifying a participant within one session
pub type ClientId = u32;

/// Sender id the server uses for data it originates
pub const SERVER_CLIENT_ID: ClientId = 0;

/// Public identity of one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInformation {
    pub id: ClientId,
    pub username: String,
    pub colour: Color32,
}

impl ClientInformation {
    pub fn new(id: ClientId, username: impl Into<String>, colour: Color32) -> Self {
        Self {
            id,
            username: username.into(),
            colour,
        }
    }

    /// Overwrite only the present fields. Returns whether anything changed.
    pub fn apply(&mut self, username: Option<&str>, colour: Option<Color32>) -> bool {
        let mut changed = false;
        if let Some(username) = username {
            if self.username != username {
                self.username = username.to_owned();
                changed = true;
            }
        }
        if let Some(colour) = colour {
            if self.colour != colour {
                self.colour = colour;
                changed = true;
            }
        }
        changed
    }
}

/// Thread-safe map of participants
#[derive(Debug, Default)]
pub struct Roster {
    clients: RwLock<HashMap<ClientId, ClientInformation>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a participant unless the id is already present.
    /// Returns `false` and leaves the live entry untouched on a duplicate.
    pub fn insert(&self, info: ClientInformation) -> bool {
        let mut clients = write_lock(&self.clients);
        if clients.contains_key(&info.id) {
            return false;
        }
        clients.insert(info.id, info);
        true
    }

    pub fn remove(&self, id: ClientId) -> Option<ClientInformation> {
        write_lock(&self.clients).remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<ClientInformation> {
        read_lock(&self.clients).get(&id).cloned()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        read_lock(&self.clients).contains_key(&id)
    }

    /// Patch one entry in place. Returns the updated record, or `None` if the
    /// id is unknown.
    pub fn update(
        &self,
        id: ClientId,
        username: Option<&str>,
        colour: Option<Color32>,
    ) -> Option<ClientInformation> {
        let mut clients = write_lock(&self.clients);
        let info = clients.get_mut(&id)?;
        info.apply(username, colour);
        Some(info.clone())
    }

    /// Ids in ascending order
    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = read_lock(&self.clients).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Copy of every entry, ordered by id
    pub fn snapshot(&self) -> Vec<ClientInformation> {
        let mut clients: Vec<ClientInformation> =
            read_lock(&self.clients).values().cloned().collect();
        clients.sort_unstable_by_key(|c| c.id);
        clients
    }

    pub fn len(&self) -> usize {
        read_lock(&self.clients).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        write_lock(&self.clients).clear();
    }
}
