use std::collections::HashMap;
use std::sync::Mutex;

/// Last-write-wins store of one pending submission per player for the
/// current phase window.
#[derive(Debug, Default)]
pub struct ActionLedger<A> {
    entries: Mutex<HashMap<String, A>>,
}

impl<A: Clone> ActionLedger<A> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `action` for `submitter`, replacing any earlier entry.
    pub fn submit(&self, submitter: &str, action: A) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(submitter.to_string(), action);
    }

    pub fn get(&self, submitter: &str) -> Option<A> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(submitter).cloned()
    }

    /// All pending entries, ordered by submitter name.
    pub fn snapshot(&self) -> Vec<(String, A)> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<(String, A)> = entries
            .iter()
            .map(|(name, action)| (name.clone(), action.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_last_write_wins() {
        let ledger = ActionLedger::new();
        ledger.submit("ali", "veli".to_string());
        ledger.submit("ali", "zeynep".to_string());

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("ali").as_deref(), Some("zeynep"));
    }

    #[test]
    fn test_snapshot_is_sorted_and_clear_empties() {
        let ledger = ActionLedger::new();
        ledger.submit("c", 3);
        ledger.submit("a", 1);
        ledger.submit("b", 2);

        let names: Vec<String> = ledger.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.get("a"), None);
    }

    #[test]
    fn test_concurrent_writers_keep_one_entry_each() {
        let ledger = Arc::new(ActionLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for round in 0..100 {
                        ledger.submit(&format!("player{}", i), round);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.len(), 8);
        for (_, last) in ledger.snapshot() {
            assert_eq!(last, 99);
        }
    }
}
