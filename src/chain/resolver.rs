//! Shard Tree Resolver
//!
//! Turns each new masterchain block into the ordered list of shard blocks
//! produced since the last one, walking parent links so that splits,
//! merges and catch-up after falling behind are all covered.
//!
//! # Single-writer invariant
//!
//! `shard_marks` (shard -> highest processed seqno) is a plain `HashMap`
//! with no lock. Exactly one task owns the resolver and every mutation goes
//! through `&mut self`, so the compiler enforces the single writer. If this
//! state is ever shared between tasks it MUST move behind a lock or into a
//! single owning actor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::client::{fetch_with_retry, ChainError, ShardSource};
use super::types::{BlockId, ShardKey};
use crate::common::Metrics;

/// Upper bound on blocks visited in one shard walk
const MAX_WALK_BLOCKS: usize = 4096;

pub struct ShardTreeResolver<S: ?Sized> {
    source: Arc<S>,
    /// Single writer: only `resolve` mutates this
    shard_marks: HashMap<ShardKey, u32>,
    fetch_attempts: u32,
    retry_delay: Duration,
    metrics: Arc<Metrics>,
}

impl<S> ShardTreeResolver<S>
where
    S: ShardSource + ?Sized,
{
    pub fn new(source: Arc<S>, fetch_attempts: u32, retry_delay: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            source,
            shard_marks: HashMap::new(),
            fetch_attempts,
            retry_delay,
            metrics,
        }
    }

    /// Highest processed seqno for a shard
    pub fn shard_mark(&self, key: &ShardKey) -> Option<u32> {
        self.shard_marks.get(key).copied()
    }

    fn is_seen(&self, block: &BlockId) -> bool {
        self.shard_marks
            .get(&block.shard_key())
            .map_or(false, |&mark| mark >= block.seqno)
    }

    fn advance_mark(&mut self, block: &BlockId) {
        self.shard_marks
            .entry(block.shard_key())
            .and_modify(|mark| *mark = (*mark).max(block.seqno))
            .or_insert(block.seqno);
    }

    /// Resolve the shard blocks new since the previous masterchain block.
    ///
    /// Blocks come back ancestor-before-descendant. A shard whose walk
    /// fails keeps its old mark and is picked up again next round.
    pub async fn resolve(&mut self, master: &BlockId) -> Result<Vec<BlockId>, ChainError> {
        let source = self.source.clone();
        let tops = fetch_with_retry("shard tops", self.fetch_attempts, self.retry_delay, || {
            source.get_shard_tops(master)
        })
        .await?;

        // First run: accept current tops as-is and seed the marks
        if self.shard_marks.is_empty() {
            for top in &tops {
                self.advance_mark(top);
            }
            self.metrics.add_shard_blocks(tops.len() as u64);
            return Ok(tops);
        }

        let mut emitted: Vec<BlockId> = Vec::new();
        let mut emitted_set: HashSet<BlockId> = HashSet::new();

        for top in tops {
            if self.is_seen(&top) || emitted_set.contains(&top) {
                continue;
            }

            match self.walk_unseen(&top, &emitted_set).await {
                Ok(blocks) => {
                    for block in blocks {
                        self.advance_mark(&block);
                        emitted_set.insert(block.clone());
                        emitted.push(block);
                    }
                }
                Err(e) => {
                    self.metrics.inc_shard_fetch_failures();
                    tracing::warn!(
                        shard = %top,
                        master_seqno = master.seqno,
                        error = %e,
                        "Shard walk failed, retrying next round"
                    );
                }
            }
        }

        self.metrics.add_shard_blocks(emitted.len() as u64);
        Ok(emitted)
    }

    /// Depth-first walk from `top` through unseen parents.
    ///
    /// A block is pushed back onto the stack as "expanded" before its
    /// parents, so it pops only after every parent has been output.
    async fn walk_unseen(
        &self,
        top: &BlockId,
        already_emitted: &HashSet<BlockId>,
    ) -> Result<Vec<BlockId>, ChainError> {
        let mut stack: Vec<(BlockId, bool)> = vec![(top.clone(), false)];
        let mut visited: HashSet<BlockId> = HashSet::new();
        let mut ordered: Vec<BlockId> = Vec::new();

        while let Some((block, expanded)) = stack.pop() {
            if expanded {
                ordered.push(block);
                continue;
            }
            if !visited.insert(block.clone()) {
                continue;
            }
            if visited.len() > MAX_WALK_BLOCKS {
                return Err(ChainError::InvalidResponse(format!(
                    "shard walk from {} exceeded {} blocks",
                    top, MAX_WALK_BLOCKS
                )));
            }

            let source = self.source.clone();
            let header = fetch_with_retry("block data", self.fetch_attempts, self.retry_delay, || {
                source.get_block_data(&block)
            })
            .await?;

            stack.push((block, true));
            for parent in header.prev_blocks {
                // Bootstrap shard blocks and seen parents end the walk
                if parent.seqno == 0 || self.is_seen(&parent) || already_emitted.contains(&parent) {
                    continue;
                }
                stack.push((parent, false));
            }
        }

        Ok(ordered)
    }

    /// Resolve every masterchain block from `input` until it closes.
    ///
    /// `output` is dropped on return, closing the scan pool's input.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<BlockId>,
        output: mpsc::UnboundedSender<BlockId>,
    ) {
        while let Some(master) = input.recv().await {
            let blocks = match self.resolve(&master).await {
                Ok(blocks) => blocks,
                Err(e) => {
                    self.metrics.inc_shard_fetch_failures();
                    tracing::warn!(master_seqno = master.seqno, error = %e, "Failed to resolve shards");
                    continue;
                }
            };

            tracing::debug!(master_seqno = master.seqno, shard_blocks = blocks.len(), "Shards resolved");
            for block in blocks {
                if output.send(block).is_err() {
                    tracing::warn!("Scan pool gone, stopping resolver");
                    return;
                }
            }
        }
        tracing::info!("Shard resolver stopped");
    }
}
