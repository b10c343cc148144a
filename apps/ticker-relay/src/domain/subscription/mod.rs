//! Subscription Registry
//!
//! Tracks which client connections want which instruments.
//!
//! # Design
//!
//! The registry keeps both directions of the many-to-many relation:
//! - Instruments per connection, for cleanup on close
//! - Connections per instrument, for fan-out and reference counting
//!
//! Every mutation reports the instruments whose subscriber count crossed
//! zero, so a single upstream channel is held open per instrument no matter
//! how many clients watch it.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::domain::window::Instrument;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a client connection.
pub type ConnectionId = u64;

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Instruments that gained their first subscriber.
    pub subscribe: HashSet<Instrument>,
    /// Instruments that lost their last subscriber.
    pub unsubscribe: HashSet<Instrument>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        Self {
            subscribe: instruments.into_iter().collect(),
            unsubscribe: HashSet::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        Self {
            subscribe: HashSet::new(),
            unsubscribe: instruments.into_iter().collect(),
        }
    }
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    by_connection: HashMap<ConnectionId, HashSet<Instrument>>,
    by_instrument: HashMap<Instrument, HashSet<ConnectionId>>,
}

impl RegistryState {
    /// Returns instruments whose subscriber count went 0→1.
    fn add(&mut self, connection: ConnectionId, instruments: &[Instrument]) -> Vec<Instrument> {
        let mut first_subscribers = Vec::new();

        for instrument in instruments {
            let added = self
                .by_connection
                .entry(connection)
                .or_default()
                .insert(instrument.clone());
            if !added {
                continue;
            }

            let subscribers = self.by_instrument.entry(instrument.clone()).or_default();
            subscribers.insert(connection);

            if subscribers.len() == 1 {
                first_subscribers.push(instrument.clone());
            }
        }

        first_subscribers
    }

    /// Returns instruments whose subscriber count went 1→0.
    fn remove(&mut self, connection: ConnectionId, instruments: &[Instrument]) -> Vec<Instrument> {
        let Some(owned) = self.by_connection.get_mut(&connection) else {
            return vec![];
        };

        let mut released = Vec::new();
        for instrument in instruments {
            if !owned.remove(instrument) {
                continue;
            }
            if detach(&mut self.by_instrument, connection, instrument) {
                released.push(instrument.clone());
            }
        }

        if owned.is_empty() {
            self.by_connection.remove(&connection);
        }

        released
    }

    fn remove_connection(&mut self, connection: ConnectionId) -> Vec<Instrument> {
        let Some(owned) = self.by_connection.remove(&connection) else {
            return vec![];
        };

        owned
            .into_iter()
            .filter(|instrument| detach(&mut self.by_instrument, connection, instrument))
            .collect()
    }
}

/// Drop `connection` from the instrument's subscribers.
///
/// Returns true when that was the last subscriber.
fn detach(
    by_instrument: &mut HashMap<Instrument, HashSet<ConnectionId>>,
    connection: ConnectionId,
    instrument: &str,
) -> bool {
    let Some(subscribers) = by_instrument.get_mut(instrument) else {
        return false;
    };
    subscribers.remove(&connection);

    if subscribers.is_empty() {
        by_instrument.remove(instrument);
        true
    } else {
        false
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of (connection, instrument) subscriptions.
///
/// # Example
///
/// ```rust
/// use ticker_relay::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
///
/// // Connection 1 subscribes to btcusd - upstream subscribe needed
/// let changes = registry.subscribe(1, &["btcusd".to_string()]);
/// assert!(changes.subscribe.contains("btcusd"));
///
/// // Connection 2 also subscribes - already open upstream
/// let changes = registry.subscribe(2, &["btcusd".to_string()]);
/// assert!(changes.is_empty());
///
/// // Connection 1 leaves - still watched by connection 2
/// let changes = registry.connection_closed(1);
/// assert!(changes.is_empty());
///
/// // Connection 2 unsubscribes - now close upstream
/// let changes = registry.unsubscribe(2, &["btcusd".to_string()]);
/// assert!(changes.unsubscribe.contains("btcusd"));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to instruments. Already-present pairs are ignored.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        instruments: &[Instrument],
    ) -> SubscriptionChanges {
        self.subscribe_then(connection, instruments, |_| {})
    }

    /// Unsubscribe a connection from instruments. Absent pairs are ignored.
    pub fn unsubscribe(
        &self,
        connection: ConnectionId,
        instruments: &[Instrument],
    ) -> SubscriptionChanges {
        self.unsubscribe_then(connection, instruments, |_| {})
    }

    /// Remove every subscription held by a closed connection.
    pub fn connection_closed(&self, connection: ConnectionId) -> SubscriptionChanges {
        self.connection_closed_then(connection, |_| {})
    }

    /// [`subscribe`](Self::subscribe), running `on_change` before the write
    /// lock is released.
    ///
    /// Callers that mirror transitions elsewhere observe them in the same
    /// order the registry applied them. `on_change` must not touch the
    /// registry.
    pub fn subscribe_then(
        &self,
        connection: ConnectionId,
        instruments: &[Instrument],
        on_change: impl FnOnce(&SubscriptionChanges),
    ) -> SubscriptionChanges {
        let mut state = self.state.write();
        let changes = SubscriptionChanges::subscribe_only(state.add(connection, instruments));
        on_change(&changes);
        changes
    }

    /// [`unsubscribe`](Self::unsubscribe), running `on_change` under the
    /// write lock.
    pub fn unsubscribe_then(
        &self,
        connection: ConnectionId,
        instruments: &[Instrument],
        on_change: impl FnOnce(&SubscriptionChanges),
    ) -> SubscriptionChanges {
        let mut state = self.state.write();
        let changes = SubscriptionChanges::unsubscribe_only(state.remove(connection, instruments));
        on_change(&changes);
        changes
    }

    /// [`connection_closed`](Self::connection_closed), running `on_change`
    /// under the write lock.
    pub fn connection_closed_then(
        &self,
        connection: ConnectionId,
        on_change: impl FnOnce(&SubscriptionChanges),
    ) -> SubscriptionChanges {
        let mut state = self.state.write();
        let changes = SubscriptionChanges::unsubscribe_only(state.remove_connection(connection));
        on_change(&changes);
        changes
    }

    /// Connections subscribed to an instrument.
    #[must_use]
    pub fn subscribers_of(&self, instrument: &str) -> HashSet<ConnectionId> {
        self.state
            .read()
            .by_instrument
            .get(instrument)
            .cloned()
            .unwrap_or_default()
    }

    /// Instruments with at least one subscriber.
    #[must_use]
    pub fn instruments_with_subscribers(&self) -> HashSet<Instrument> {
        self.state.read().by_instrument.keys().cloned().collect()
    }

    /// Instruments a connection is subscribed to.
    #[must_use]
    pub fn instruments_of(&self, connection: ConnectionId) -> HashSet<Instrument> {
        self.state
            .read()
            .by_connection
            .get(&connection)
            .cloned()
            .unwrap_or_default()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            instrument_count: state.by_instrument.len(),
            connection_count: state.by_connection.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Instruments with at least one subscriber.
    pub instrument_count: usize,
    /// Connections with at least one subscription.
    pub connection_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
