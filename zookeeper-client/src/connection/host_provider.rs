//! Server selection for (re)connect attempts.

use rand::seq::SliceRandom;

/// Hands out ensemble addresses in shuffled round-robin order.
///
/// The list is reshuffled every time it wraps. The address that failed last
/// is skipped when another one is available.
#[derive(Debug)]
pub struct HostProvider {
    servers: Vec<String>,
    index: usize,
    last_failed: Option<String>,
}

impl HostProvider {
    /// Creates a provider over `servers`. The list must not be empty.
    pub fn new(servers: Vec<String>) -> Self {
        let mut provider = Self {
            servers,
            index: 0,
            last_failed: None,
        };
        provider.shuffle();
        provider
    }

    /// Returns the number of known servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Returns `true` if no servers are known.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Returns the next address to try.
    pub fn next(&mut self) -> Option<String> {
        if self.servers.is_empty() {
            return None;
        }
        loop {
            if self.index >= self.servers.len() {
                self.shuffle();
            }
            let candidate = &self.servers[self.index];
            self.index += 1;

            let skip = self.servers.len() > 1 && self.last_failed.as_ref() == Some(candidate);
            if !skip {
                return Some(candidate.clone());
            }
        }
    }

    /// Records that `server` could not be reached or dropped the connection.
    pub fn mark_failed(&mut self, server: &str) {
        self.last_failed = Some(server.to_string());
    }

    /// Records a successful connection.
    pub fn mark_connected(&mut self) {
        self.last_failed = None;
    }

    fn shuffle(&mut self) {
        self.servers.shuffle(&mut rand::thread_rng());
        self.index = 0;
    }
}
