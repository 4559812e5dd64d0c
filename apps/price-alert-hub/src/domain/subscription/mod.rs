//! Client Interest Tracking
//!
//! Domain types for tracking which symbols each connected client wants
//! price updates for.
//!
//! # Design
//!
//! The interest table keeps two views of the same relation:
//! - Which symbols each client is subscribed to
//! - Which clients are interested in each symbol (reverse index)
//!
//! The reverse index lets the broadcaster fan a tick out without scanning
//! every session. Both views are updated under one lock, so a reader never
//! observes a client in one view but not the other.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::domain::market::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a connected client.
pub type ClientId = u64;

/// Result of adding a symbol to a client's interest set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestChange {
    /// Symbol was added.
    Added,
    /// Client already had the symbol.
    AlreadyPresent,
    /// Client is not registered (disconnected).
    UnknownClient,
}

impl InterestChange {
    /// Whether the interest set changed.
    #[must_use]
    pub const fn is_added(self) -> bool {
        matches!(self, Self::Added)
    }
}

// =============================================================================
// Interest State
// =============================================================================

#[derive(Debug, Default)]
struct InterestState {
    /// Map from client to their subscribed symbols.
    client_symbols: HashMap<ClientId, HashSet<Symbol>>,
    /// Map from symbol to the clients interested in it.
    symbol_clients: HashMap<Symbol, HashSet<ClientId>>,
}

impl InterestState {
    fn add(&mut self, client: ClientId, symbol: &Symbol) -> InterestChange {
        let Some(symbols) = self.client_symbols.get_mut(&client) else {
            return InterestChange::UnknownClient;
        };
        if !symbols.insert(symbol.clone()) {
            return InterestChange::AlreadyPresent;
        }
        self.symbol_clients
            .entry(symbol.clone())
            .or_default()
            .insert(client);
        InterestChange::Added
    }

    fn remove(&mut self, client: ClientId, symbol: &Symbol) -> bool {
        let removed = self
            .client_symbols
            .get_mut(&client)
            .is_some_and(|symbols| symbols.remove(symbol));
        if removed {
            self.unlink(symbol, client);
        }
        removed
    }

    fn unlink(&mut self, symbol: &Symbol, client: ClientId) {
        if let Some(clients) = self.symbol_clients.get_mut(symbol) {
            clients.remove(&client);
            if clients.is_empty() {
                self.symbol_clients.remove(symbol);
            }
        }
    }

    fn purge_symbol(&mut self, symbol: &Symbol) -> Vec<ClientId> {
        let Some(clients) = self.symbol_clients.remove(symbol) else {
            return vec![];
        };
        for client in &clients {
            if let Some(symbols) = self.client_symbols.get_mut(client) {
                symbols.remove(symbol);
            }
        }
        let mut clients: Vec<_> = clients.into_iter().collect();
        clients.sort_unstable();
        clients
    }
}

// =============================================================================
// Interest Table
// =============================================================================

/// Thread-safe table of client interest sets.
///
/// # Example
///
/// ```rust
/// use price_alert_hub::domain::market::Symbol;
/// use price_alert_hub::domain::subscription::{InterestChange, InterestTable};
///
/// let table = InterestTable::new();
/// let aapl = Symbol::parse("aapl").unwrap();
///
/// table.register(1);
/// assert_eq!(table.add(1, &aapl), InterestChange::Added);
/// assert_eq!(table.add(1, &aapl), InterestChange::AlreadyPresent);
/// assert!(table.interested_clients(&aapl).contains(&1));
///
/// assert!(table.remove(1, &aapl));
/// assert!(table.interested_clients(&aapl).is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InterestTable {
    state: RwLock<InterestState>,
}

impl InterestTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client with an empty interest set.
    ///
    /// Returns `false` if the client was already registered.
    pub fn register(&self, client: ClientId) -> bool {
        let mut state = self.state.write();
        if state.client_symbols.contains_key(&client) {
            return false;
        }
        state.client_symbols.insert(client, HashSet::new());
        true
    }

    /// Forget a client. Its interest set must already be empty or the
    /// leftover symbols are unlinked and returned.
    pub fn unregister(&self, client: ClientId) -> Vec<Symbol> {
        let mut state = self.state.write();
        let Some(symbols) = state.client_symbols.remove(&client) else {
            return vec![];
        };
        for symbol in &symbols {
            state.unlink(symbol, client);
        }
        symbols.into_iter().collect()
    }

    /// Whether the client is registered.
    #[must_use]
    pub fn is_registered(&self, client: ClientId) -> bool {
        self.state.read().client_symbols.contains_key(&client)
    }

    /// Add a symbol to a client's interest set.
    pub fn add(&self, client: ClientId, symbol: &Symbol) -> InterestChange {
        self.state.write().add(client, symbol)
    }

    /// Remove a symbol from a client's interest set.
    ///
    /// Returns `true` if the symbol was present.
    pub fn remove(&self, client: ClientId, symbol: &Symbol) -> bool {
        self.state.write().remove(client, symbol)
    }

    /// Whether the client is interested in the symbol.
    #[must_use]
    pub fn contains(&self, client: ClientId, symbol: &Symbol) -> bool {
        self.state
            .read()
            .client_symbols
            .get(&client)
            .is_some_and(|symbols| symbols.contains(symbol))
    }

    /// Remove a symbol from every interest set.
    ///
    /// Returns the affected clients in ascending order.
    pub fn purge_symbol(&self, symbol: &Symbol) -> Vec<ClientId> {
        self.state.write().purge_symbol(symbol)
    }

    /// Symbols a client is subscribed to, sorted.
    #[must_use]
    pub fn client_symbols(&self, client: ClientId) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self
            .state
            .read()
            .client_symbols
            .get(&client)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort_unstable();
        symbols
    }

    /// Clients interested in a symbol.
    #[must_use]
    pub fn interested_clients(&self, symbol: &Symbol) -> HashSet<ClientId> {
        self.state
            .read()
            .symbol_clients
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    /// Run `f` for each client interested in `symbol` while holding the
    /// read lock, so no interest change can interleave with the visit.
    pub fn for_each_interested(&self, symbol: &Symbol, mut f: impl FnMut(ClientId)) {
        let state = self.state.read();
        if let Some(clients) = state.symbol_clients.get(symbol) {
            for client in clients {
                f(*client);
            }
        }
    }

    /// Number of clients interested in a symbol.
    #[must_use]
    pub fn interest_count(&self, symbol: &Symbol) -> usize {
        self.state
            .read()
            .symbol_clients
            .get(symbol)
            .map_or(0, HashSet::len)
    }

    /// Current table statistics.
    #[must_use]
    pub fn stats(&self) -> InterestStats {
        let state = self.state.read();
        InterestStats {
            client_count: state.client_symbols.len(),
            symbol_count: state.symbol_clients.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Interest table statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterestStats {
    /// Number of registered clients.
    pub client_count: usize,
    /// Number of symbols with at least one interested client.
    pub symbol_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
