//! One-to-one sessions
//!
//! A session pairs two idle peers. The pairing is stored from both sides
//! so either party finds its partner in one lookup.

use std::collections::HashMap;

use crate::error::{BrokerError, Result};
use crate::registry::{PeerRegistry, PeerStatus};

/// Symmetric pairing table
#[derive(Debug, Default)]
pub struct SessionTable {
    partners: HashMap<String, String>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `caller` with `callee`, moving both to InSession
    pub fn request(
        &mut self,
        registry: &mut PeerRegistry,
        caller: &str,
        callee: &str,
    ) -> Result<()> {
        let callee_status = registry.lookup(callee)?.status.clone();
        let caller_status = registry.lookup(caller)?.status.clone();

        if !caller_status.is_idle() {
            return Err(BrokerError::AlreadyInSession);
        }
        if caller == callee {
            return Err(BrokerError::SelfSession);
        }
        if !callee_status.is_idle() {
            return Err(BrokerError::PeerBusy(callee.to_string()));
        }

        registry.set_status(caller, PeerStatus::InSession);
        registry.set_status(callee, PeerStatus::InSession);
        self.partners.insert(caller.to_string(), callee.to_string());
        self.partners.insert(callee.to_string(), caller.to_string());
        Ok(())
    }

    pub fn partner(&self, id: &str) -> Option<&str> {
        self.partners.get(id).map(String::as_str)
    }

    /// Dissolve the session `id` is part of, returning both peers to Idle.
    ///
    /// Returns the former partner, or `None` if there was no session.
    pub fn end(&mut self, registry: &mut PeerRegistry, id: &str) -> Option<String> {
        let partner = self.partners.remove(id)?;
        self.partners.remove(&partner);

        registry.set_status(id, PeerStatus::Idle);
        registry.set_status(&partner, PeerStatus::Idle);
        Some(partner)
    }

    /// Iterate over both directions of every pairing
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.partners.iter().map(|(a, b)| (a.as_str(), b.as_str()))
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.partners.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }
}
