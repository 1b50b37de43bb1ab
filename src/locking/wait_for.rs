use ahash::{AHashMap as HashMap, AHashSet as HashSet};

/// Wait-for relation among blocked transactions.
///
/// An edge `waiter -> holder` means `waiter` is blocked on a lock that
/// `holder` keeps. A cycle is a deadlock. The graph is owned by the lock
/// table and mutated only under its mutex.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: HashMap<u64, HashSet<u64>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the outgoing edges of `waiter`.
    pub fn set_waits(&mut self, waiter: u64, holders: impl IntoIterator<Item = u64>) {
        let holders: HashSet<u64> = holders.into_iter().filter(|h| *h != waiter).collect();
        if holders.is_empty() {
            self.edges.remove(&waiter);
        } else {
            self.edges.insert(waiter, holders);
        }
    }

    /// Removes the outgoing edges of `waiter`; it is no longer blocked.
    pub fn clear_waits(&mut self, waiter: u64) {
        self.edges.remove(&waiter);
    }

    /// Removes every edge from or to `txn_id`.
    pub fn remove_txn(&mut self, txn_id: u64) {
        self.edges.remove(&txn_id);
        self.edges.retain(|_, holders| {
            holders.remove(&txn_id);
            !holders.is_empty()
        });
    }

    pub fn waits_for(&self, waiter: u64) -> Option<&HashSet<u64>> {
        self.edges.get(&waiter)
    }

    /// Number of blocked transactions.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Searches for a cycle passing through `start`.
    ///
    /// Returns the transactions on the cycle, beginning with `start`.
    pub fn find_cycle(&self, start: u64) -> Option<Vec<u64>> {
        let mut visited = HashSet::new();
        visited.insert(start);
        let mut path = vec![start];
        if self.walk(start, start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn walk(&self, node: u64, start: u64, visited: &mut HashSet<u64>, path: &mut Vec<u64>) -> bool {
        let Some(next) = self.edges.get(&node) else {
            return false;
        };
        for &holder in next {
            if holder == start {
                return true;
            }
            if visited.insert(holder) {
                path.push(holder);
                if self.walk(holder, start, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }
}
