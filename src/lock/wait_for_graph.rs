//! Wait-for graph cycle detection, used to detect deadlocks eagerly at
//! lock-request time rather than via a timeout alone (spec Section
//! 4.C, "Deadlock detection").
//!
//! A near-literal port of the teacher's `transaction/wait_for_graph.rs`
//! (same edge-set-per-waiter representation, same DFS cycle check).

use std::collections::{HashMap, HashSet};

pub struct WaitForGraph {
    graph: HashMap<u64, HashSet<u64>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self {
            graph: HashMap::new(),
        }
    }

    pub fn add_edge(&mut self, from: u64, to: u64) {
        self.graph.entry(from).or_insert_with(HashSet::new).insert(to);
    }

    pub fn remove_waiter(&mut self, tid: u64) {
        self.graph.remove(&tid);
    }

    pub fn remove_transaction(&mut self, tid: u64) {
        self.graph.remove(&tid);
        for waiters in self.graph.values_mut() {
            waiters.remove(&tid);
        }
    }

    pub fn exists_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        for &tid in self.graph.keys() {
            if self.is_cyclic(tid, &mut visited, &mut rec_stack) {
                return true;
            }
        }
        false
    }

    fn is_cyclic(&self, tid: u64, visited: &mut HashSet<u64>, rec_stack: &mut HashSet<u64>) -> bool {
        if !visited.contains(&tid) {
            visited.insert(tid);
            rec_stack.insert(tid);
            if let Some(waiting_on) = self.graph.get(&tid) {
                for &next in waiting_on {
                    if !visited.contains(&next) && self.is_cyclic(next, visited, rec_stack) {
                        return true;
                    } else if rec_stack.contains(&next) {
                        return true;
                    }
                }
            }
        }
        rec_stack.remove(&tid);
        false
    }
}

impl Default for WaitForGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_simple_cycle() {
        let mut g = WaitForGraph::new();
        g.add_edge(1, 2);
        g.add_edge(2, 1);
        assert!(g.exists_cycle());
    }

    #[test]
    fn no_cycle_in_chain() {
        let mut g = WaitForGraph::new();
        g.add_edge(1, 2);
        g.add_edge(2, 3);
        assert!(!g.exists_cycle());
    }

    #[test]
    fn removing_transaction_breaks_cycle() {
        let mut g = WaitForGraph::new();
        g.add_edge(1, 2);
        g.add_edge(2, 1);
        g.remove_transaction(2);
        assert!(!g.exists_cycle());
    }
}
