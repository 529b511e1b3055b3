use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::utxo::Utxo;

/// Coins whose reward-origin transaction confirmed at or below this height
/// are classified as vested.
pub const VESTING_THRESHOLD_HEIGHT: u32 = 280_000;

/// Hard cap on ancestry length; a walk that exceeds it is reported as a
/// malformed chain rather than looping forever.
pub const MAX_ANCESTRY_HOPS: usize = 10_000;

/// One input of a transaction as reported by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDetailInput {
    /// Display-order txid of the spent output's transaction. Absent (or
    /// all-zero) for reward-origin inputs.
    #[serde(default)]
    pub prev_txid: Option<String>,
    pub sequence: u32,
}

/// Transaction detail as reported by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDetail {
    pub inputs: Vec<TxDetailInput>,
    pub confirmations: u32,
}

/// Ledger access consumed by the engine.
///
/// Implementations own their transport, timeouts, and retries; the engine
/// treats any returned error as terminal for the operation at hand.
pub trait ChainSource {
    fn transaction_detail(&self, txid: &str) -> Result<TxDetail, EngineError>;

    fn tip_height(&self) -> Result<u32, EngineError>;

    /// Submit raw transaction bytes; returns the display-order txid.
    fn broadcast(&self, raw_tx: &[u8]) -> Result<String, EngineError>;
}

/// One resolved hop of an ancestry walk, keyed by txid.
///
/// Entries are append-only: once written with `is_coinbase = true` and a
/// known height they are never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VestingCacheEntry {
    pub block_height: Option<u32>,
    pub is_coinbase: bool,
    #[serde(default)]
    pub prev_txid: Option<String>,
}

/// Persistent cache tier for ancestry hops.
///
/// The engine never clears this tier on its own; callers do so explicitly
/// when the chain tip has materially advanced.
pub trait VestingCache {
    fn get(&self, txid: &str) -> Option<VestingCacheEntry>;
    fn set(&mut self, txid: &str, entry: VestingCacheEntry);
    fn clear(&mut self);
}

/// HashMap-backed cache, usable as the persistent tier when no durable
/// store is wired in.
#[derive(Debug, Default)]
pub struct MemoryVestingCache {
    entries: HashMap<String, VestingCacheEntry>,
}

impl MemoryVestingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl VestingCache for MemoryVestingCache {
    fn get(&self, txid: &str) -> Option<VestingCacheEntry> {
        self.entries.get(txid).cloned()
    }

    fn set(&mut self, txid: &str, entry: VestingCacheEntry) {
        self.entries.insert(txid.to_string(), entry);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Per-UTXO classification outcome. Never persisted beyond the caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub is_vested: bool,
    pub coinbase_height: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

fn is_zero_txid(txid: &str) -> bool {
    txid.len() == 64 && txid.bytes().all(|b| b == b'0')
}

/// Walks UTXO ancestries back to their reward-origin transaction and
/// classifies them against [`VESTING_THRESHOLD_HEIGHT`].
///
/// Owns an in-process cache (cleared at the start of every batch, since
/// heights computed against one captured tip must not leak into the next
/// batch) and a pluggable persistent tier (never cleared automatically).
pub struct VestingClassifier<C: ChainSource> {
    chain: C,
    memory: HashMap<String, VestingCacheEntry>,
    persistent: Box<dyn VestingCache>,
}

impl<C: ChainSource> VestingClassifier<C> {
    pub fn new(chain: C, persistent: Box<dyn VestingCache>) -> Self {
        Self {
            chain,
            memory: HashMap::new(),
            persistent,
        }
    }

    /// Explicitly drop both cache tiers.
    pub fn clear_persistent_cache(&mut self) {
        self.memory.clear();
        self.persistent.clear();
    }

    /// Classify each UTXO, reporting progress as `(done, total)` after each.
    ///
    /// The tip height is captured once so every height in the batch is
    /// computed against the same tip. A broken ancestry yields an error
    /// result for that UTXO (conservatively unvested) without aborting the
    /// rest of the batch.
    pub fn classify_batch(
        &mut self,
        utxos: &[Utxo],
        mut progress: impl FnMut(usize, usize),
    ) -> Vec<ClassificationResult> {
        self.memory.clear();

        let tip = match self.chain.tip_height() {
            Ok(tip) => tip,
            Err(e) => {
                log::warn!("tip height unavailable, failing batch of {}: {e}", utxos.len());
                let mut results = Vec::with_capacity(utxos.len());
                for (i, _) in utxos.iter().enumerate() {
                    results.push(ClassificationResult {
                        is_vested: false,
                        coinbase_height: None,
                        error: Some(format!("tip height unavailable: {e}")),
                    });
                    progress(i + 1, utxos.len());
                }
                return results;
            }
        };

        log::info!("classifying {} utxo(s) at tip {tip}", utxos.len());
        let mut results = Vec::with_capacity(utxos.len());
        for (i, utxo) in utxos.iter().enumerate() {
            let result = match self.coinbase_height(&utxo.txid, tip) {
                Ok(height) => ClassificationResult {
                    is_vested: height <= VESTING_THRESHOLD_HEIGHT,
                    coinbase_height: Some(height),
                    error: None,
                },
                Err(e) => ClassificationResult {
                    is_vested: false,
                    coinbase_height: None,
                    error: Some(e.to_string()),
                },
            };
            results.push(result);
            progress(i + 1, utxos.len());
        }
        results
    }

    /// Resolve the block height of the reward-origin transaction at the
    /// root of `txid`'s single-parent ancestry.
    ///
    /// Iterative with a hop cap; every resolved hop is written to both
    /// cache tiers, so overlapping ancestries fetch each ancestor once.
    pub fn coinbase_height(&mut self, txid: &str, tip: u32) -> Result<u32, EngineError> {
        let mut current = txid.to_string();

        for _ in 0..MAX_ANCESTRY_HOPS {
            if let Some(entry) = self.lookup(&current) {
                if entry.is_coinbase {
                    if let Some(height) = entry.block_height {
                        log::debug!("cache hit: {current} is coinbase at {height}");
                        return Ok(height);
                    }
                } else if let Some(prev) = entry.prev_txid {
                    current = prev;
                    continue;
                }
                // Incomplete entry; fall through and refetch.
            }

            let detail = self
                .chain
                .transaction_detail(&current)
                .map_err(|e| EngineError::AncestryWalk(format!("fetch {current}: {e}")))?;

            if detail.confirmations == 0 {
                return Err(EngineError::AncestryWalk(format!(
                    "transaction {current} is unconfirmed"
                )));
            }
            let height = (tip + 1).saturating_sub(detail.confirmations);

            let first_input = detail.inputs.first().ok_or_else(|| {
                EngineError::AncestryWalk(format!(
                    "transaction {current} has no inputs and is not a reward origin"
                ))
            })?;

            let parent = match &first_input.prev_txid {
                Some(prev) if !is_zero_txid(prev) => Some(prev.clone()),
                _ => None,
            };

            match parent {
                None => {
                    // Reward origin: no referenced parent transaction.
                    self.store(
                        &current,
                        VestingCacheEntry {
                            block_height: Some(height),
                            is_coinbase: true,
                            prev_txid: None,
                        },
                    );
                    return Ok(height);
                }
                Some(prev) => {
                    self.store(
                        &current,
                        VestingCacheEntry {
                            block_height: Some(height),
                            is_coinbase: false,
                            prev_txid: Some(prev.clone()),
                        },
                    );
                    current = prev;
                }
            }
        }

        Err(EngineError::AncestryWalk(format!(
            "ancestry of {txid} exceeds {MAX_ANCESTRY_HOPS} hops"
        )))
    }

    /// Check the in-process tier, then the persistent tier; a persistent
    /// hit is promoted into the in-process tier.
    fn lookup(&mut self, txid: &str) -> Option<VestingCacheEntry> {
        if let Some(entry) = self.memory.get(txid) {
            return Some(entry.clone());
        }
        if let Some(entry) = self.persistent.get(txid) {
            self.memory.insert(txid.to_string(), entry.clone());
            return Some(entry);
        }
        None
    }

    fn store(&mut self, txid: &str, entry: VestingCacheEntry) {
        self.memory.insert(txid.to_string(), entry.clone());
        self.persistent.set(txid, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Scripted chain source: transactions by txid plus a fetch counter.
    struct MockChain {
        tip: Result<u32, String>,
        transactions: HashMap<String, TxDetail>,
        fetches: RefCell<usize>,
    }

    impl MockChain {
        fn new(tip: u32) -> Self {
            Self {
                tip: Ok(tip),
                transactions: HashMap::new(),
                fetches: RefCell::new(0),
            }
        }

        /// Insert a spend of `prev` with the given confirmations.
        fn add_spend(&mut self, txid: &str, prev: &str, confirmations: u32) {
            self.transactions.insert(
                txid.to_string(),
                TxDetail {
                    inputs: vec![TxDetailInput {
                        prev_txid: Some(prev.to_string()),
                        sequence: 0xffff_fffe,
                    }],
                    confirmations,
                },
            );
        }

        /// Insert a reward-origin transaction confirming at `height`
        /// (confirmations derived from the mock tip).
        fn add_coinbase(&mut self, txid: &str, height: u32) {
            let tip = *self.tip.as_ref().unwrap();
            self.transactions.insert(
                txid.to_string(),
                TxDetail {
                    inputs: vec![TxDetailInput {
                        prev_txid: Some("0".repeat(64)),
                        sequence: 0xffff_ffff,
                    }],
                    confirmations: tip - height + 1,
                },
            );
        }

        fn fetch_count(&self) -> usize {
            *self.fetches.borrow()
        }
    }

    impl ChainSource for MockChain {
        fn transaction_detail(&self, txid: &str) -> Result<TxDetail, EngineError> {
            *self.fetches.borrow_mut() += 1;
            self.transactions
                .get(txid)
                .cloned()
                .ok_or_else(|| EngineError::Network(format!("unknown transaction {txid}")))
        }

        fn tip_height(&self) -> Result<u32, EngineError> {
            self.tip
                .clone()
                .map_err(EngineError::Network)
        }

        fn broadcast(&self, _raw_tx: &[u8]) -> Result<String, EngineError> {
            Ok("f".repeat(64))
        }
    }

    fn utxo(txid: &str) -> Utxo {
        Utxo {
            txid: txid.to_string(),
            vout: 0,
            value_sats: 100_000,
            height: None,
            address: None,
        }
    }

    fn classifier(chain: MockChain) -> VestingClassifier<MockChain> {
        VestingClassifier::new(chain, Box::new(MemoryVestingCache::new()))
    }

    #[test]
    fn early_coinbase_is_vested() {
        let mut chain = MockChain::new(500_000);
        chain.add_coinbase("cb", 100_000);
        chain.add_spend("mid", "cb", 350_000);
        chain.add_spend("tx", "mid", 100_000);

        let mut c = classifier(chain);
        let results = c.classify_batch(&[utxo("tx")], |_, _| {});
        assert!(results[0].is_vested);
        assert_eq!(results[0].coinbase_height, Some(100_000));
        assert!(results[0].error.is_none());
    }

    #[test]
    fn late_coinbase_is_not_vested() {
        let mut chain = MockChain::new(500_000);
        chain.add_coinbase("cb", 300_000);
        chain.add_spend("tx", "cb", 100_000);

        let mut c = classifier(chain);
        let results = c.classify_batch(&[utxo("tx")], |_, _| {});
        assert!(!results[0].is_vested);
        assert_eq!(results[0].coinbase_height, Some(300_000));
    }

    #[test]
    fn threshold_boundary_is_vested() {
        let mut chain = MockChain::new(500_000);
        chain.add_coinbase("cb", VESTING_THRESHOLD_HEIGHT);
        let mut c = classifier(chain);
        let results = c.classify_batch(&[utxo("cb")], |_, _| {});
        assert!(results[0].is_vested);
    }

    #[test]
    fn absent_prev_txid_also_marks_coinbase() {
        let mut chain = MockChain::new(500_000);
        chain.transactions.insert(
            "cb".into(),
            TxDetail {
                inputs: vec![TxDetailInput {
                    prev_txid: None,
                    sequence: 0,
                }],
                confirmations: 400_001,
            },
        );
        let mut c = classifier(chain);
        let results = c.classify_batch(&[utxo("cb")], |_, _| {});
        assert_eq!(results[0].coinbase_height, Some(100_000));
        assert!(results[0].is_vested);
    }

    #[test]
    fn inputless_transaction_is_an_error_not_a_coinbase() {
        let mut chain = MockChain::new(500_000);
        chain.transactions.insert(
            "odd".into(),
            TxDetail {
                inputs: vec![],
                confirmations: 10,
            },
        );
        let mut c = classifier(chain);
        let results = c.classify_batch(&[utxo("odd")], |_, _| {});
        assert!(!results[0].is_vested);
        assert_eq!(results[0].coinbase_height, None);
        let err = results[0].error.as_deref().unwrap();
        assert!(!err.is_empty());
        assert!(err.contains("no inputs"));
    }

    #[test]
    fn fetch_failure_is_caught_per_utxo() {
        let mut chain = MockChain::new(500_000);
        chain.add_coinbase("cb", 100_000);
        // "gone" is not in the mock; its walk fails, cb's still succeeds.
        let mut c = classifier(chain);
        let results = c.classify_batch(&[utxo("gone"), utxo("cb")], |_, _| {});
        assert!(results[0].error.is_some());
        assert!(!results[0].is_vested);
        assert!(results[1].is_vested);
    }

    #[test]
    fn ancestry_loop_hits_hop_cap() {
        let mut chain = MockChain::new(500_000);
        chain.add_spend("a", "b", 10);
        chain.add_spend("b", "a", 10);
        let mut c = classifier(chain);
        let results = c.classify_batch(&[utxo("a")], |_, _| {});
        let err = results[0].error.as_deref().unwrap();
        assert!(err.contains("hops"), "got: {err}");
    }

    #[test]
    fn unconfirmed_ancestor_is_an_error() {
        let mut chain = MockChain::new(500_000);
        chain.add_spend("tx", "cb", 0);
        let mut c = classifier(chain);
        let results = c.classify_batch(&[utxo("tx")], |_, _| {});
        assert!(results[0].error.as_deref().unwrap().contains("unconfirmed"));
    }

    #[test]
    fn tip_failure_fails_whole_batch_without_fetches() {
        let mut chain = MockChain::new(0);
        chain.tip = Err("node unreachable".into());
        chain.add_coinbase_unchecked();
        let mut c = classifier(chain);
        let results = c.classify_batch(&[utxo("x"), utxo("y")], |_, _| {});
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.error.is_some() && !r.is_vested));
        assert_eq!(c.chain.fetch_count(), 0);
    }

    impl MockChain {
        fn add_coinbase_unchecked(&mut self) {
            self.transactions.insert(
                "x".into(),
                TxDetail {
                    inputs: vec![TxDetailInput {
                        prev_txid: None,
                        sequence: 0,
                    }],
                    confirmations: 1,
                },
            );
        }
    }

    #[test]
    fn overlapping_ancestries_fetch_each_ancestor_once() {
        let mut chain = MockChain::new(500_000);
        chain.add_coinbase("cb", 100_000);
        chain.add_spend("shared", "cb", 200_000);
        chain.add_spend("u1", "shared", 150_000);
        chain.add_spend("u2", "shared", 140_000);

        let mut c = classifier(chain);
        let results = c.classify_batch(&[utxo("u1"), utxo("u2"), utxo("u1")], |_, _| {});
        assert!(results.iter().all(|r| r.is_vested));
        // u1, u2, shared, cb: one fetch per distinct transaction.
        assert_eq!(c.chain.fetch_count(), 4);
    }

    #[test]
    fn persistent_cache_survives_batches_memory_does_not() {
        let mut chain = MockChain::new(500_000);
        chain.add_coinbase("cb", 100_000);
        chain.add_spend("tx", "cb", 150_000);

        let mut c = classifier(chain);
        c.classify_batch(&[utxo("tx")], |_, _| {});
        let after_first = c.chain.fetch_count();
        assert_eq!(after_first, 2);

        // Second batch clears the in-process tier but resolves every hop
        // from the persistent tier without refetching.
        let results = c.classify_batch(&[utxo("tx")], |_, _| {});
        assert!(results[0].is_vested);
        assert_eq!(c.chain.fetch_count(), after_first);

        c.clear_persistent_cache();
        c.classify_batch(&[utxo("tx")], |_, _| {});
        assert_eq!(c.chain.fetch_count(), after_first + 2);
    }

    #[test]
    fn progress_is_reported_after_each_utxo() {
        let mut chain = MockChain::new(500_000);
        chain.add_coinbase("cb", 100_000);
        let mut seen = Vec::new();
        let mut c = classifier(chain);
        c.classify_batch(&[utxo("cb"), utxo("cb")], |done, total| {
            seen.push((done, total));
        });
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn zero_txid_detection() {
        assert!(is_zero_txid(&"0".repeat(64)));
        assert!(!is_zero_txid(&"1".repeat(64)));
        assert!(!is_zero_txid("00"));
    }
}
