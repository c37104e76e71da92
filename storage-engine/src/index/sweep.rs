//! Predicate sweep: a single pass over the leaf chain that removes every
//! entry the predicate accepts and yields the removed entries leaf by leaf.
//!
//! The cursor works one leaf at a time. Under the leaf's write latch it asks
//! the predicate about every entry past its key bound, removes the matches in
//! place and queues them. Queued entries are handed out by [`SweepCursor::advance`]
//! without any latch held; between leaves the cursor only remembers the next
//! leaf's ID and structural version. If that leaf changed shape in the
//! meantime the cursor re-navigates from the root using the last key it
//! visited, so no entry is visited twice and none is skipped.
//!
//! Leaves that drop below the minimum fill are repaired before the cursor
//! moves on, and the cursor resumes on whichever leaf survived the repair.
//! Dropping the cursor early leaves the tree valid.

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::atomic::Ordering;

use page_store::INVALID_PAGE_ID;
use tracing::{debug, trace};

use super::bptree::{leaf_mut, leaf_ref, BPlusTree, Counters, WriteGuard};
use super::error::{PredicateError, TreeError, TreeResult};
use super::navigator::{Position, Target};

/// Order in which a sweep visits keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Backward,
}

/// An entry offered to a sweep predicate.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a, K, V> {
    key: &'a K,
    value: &'a V,
}

impl<'a, K, V> Entry<'a, K, V> {
    pub fn key(&self) -> &'a K {
        self.key
    }

    pub fn value(&self) -> &'a V {
        self.value
    }
}

pub(crate) type BoxedPredicate<'t, K, V> =
    Box<dyn FnMut(Entry<'_, K, V>) -> Result<bool, PredicateError> + 't>;

/// Lazy removal cursor returned by [`BPlusTree::sweep`] and
/// [`BPlusTree::try_sweep`].
///
/// The predicate runs while a leaf is write-latched; it must not call back
/// into the same tree.
pub struct SweepCursor<'t, K, V> {
    tree: &'t BPlusTree<K, V>,
    direction: Direction,
    predicate: BoxedPredicate<'t, K, V>,
    position: Position,
    /// Last key the predicate was asked about.
    bound: Option<K>,
    removed: VecDeque<(K, V)>,
    current: Option<(K, V)>,
    /// Predicate error held back until the queued removals are yielded.
    pending_failure: Option<TreeError>,
    failed: bool,
    removed_count: usize,
    visited_count: usize,
}

impl<'t, K, V> SweepCursor<'t, K, V>
where
    K: Ord + Clone + Debug,
{
    pub(crate) fn new(tree: &'t BPlusTree<K, V>, direction: Direction, predicate: BoxedPredicate<'t, K, V>) -> Self {
        trace!(?direction, "starting sweep");
        Self {
            tree,
            direction,
            predicate,
            position: Position::Start,
            bound: None,
            removed: VecDeque::new(),
            current: None,
            pending_failure: None,
            failed: false,
            removed_count: 0,
            visited_count: 0,
        }
    }

    /// Moves to the next removed entry.
    ///
    /// Returns `Ok(false)` once the sweep has visited every entry. After a
    /// predicate failure the entries removed before it are still yielded,
    /// then [`TreeError::PredicateFailure`] is returned once and
    /// [`TreeError::CursorFailed`] on every later call.
    pub fn advance(&mut self) -> TreeResult<bool> {
        loop {
            if let Some(entry) = self.removed.pop_front() {
                self.current = Some(entry);
                return Ok(true);
            }
            self.current = None;

            if let Some(err) = self.pending_failure.take() {
                self.failed = true;
                return Err(err);
            }
            if self.failed {
                return Err(TreeError::CursorFailed);
            }
            if self.position == Position::Exhausted {
                return Ok(false);
            }

            if let Err(err) = self.sweep_leaves() {
                self.failed = true;
                return Err(err);
            }
        }
    }

    /// The entry yielded by the last successful [`Self::advance`].
    pub fn current(&self) -> Option<(&K, &V)> {
        self.current.as_ref().map(|(key, value)| (key, value))
    }

    pub fn current_key(&self) -> Option<&K> {
        self.current.as_ref().map(|(key, _)| key)
    }

    /// Number of entries removed from the tree so far, including entries not
    /// yet yielded.
    pub fn removed_count(&self) -> usize {
        self.removed_count
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Processes leaves until there are removed entries to yield, the chain
    /// ends, or the cursor has to re-navigate.
    fn sweep_leaves(&mut self) -> TreeResult<()> {
        let Some(mut leaf) = self.resolve_position()? else {
            return Ok(());
        };

        loop {
            let hint = self.scan_leaf(&mut leaf)?;

            let underflow = self.tree.is_underflow(&leaf);
            if self.pending_failure.is_some() || (underflow && hint.is_some()) {
                drop(leaf);
                let survivor = match hint.filter(|_| underflow) {
                    Some(hint) => self.tree.fix_underflow(&hint)?,
                    None => None,
                };
                // The surviving leaf covers the bound; the scan resumes past
                // it there unless the leaf changes again first.
                self.position = match survivor {
                    Some((page_id, version)) => Position::Page { page_id, version },
                    None => Position::Seek,
                };
                return Ok(());
            }

            leaf = match self.step(leaf)? {
                Some(next) => next,
                None => return Ok(()),
            };

            if !self.removed.is_empty() {
                self.position = Position::Page {
                    page_id: leaf.page_id(),
                    version: leaf.structural_version(),
                };
                return Ok(());
            }
        }
    }

    /// Re-acquires the leaf to continue from, or `None` once exhausted.
    fn resolve_position(&mut self) -> TreeResult<Option<WriteGuard<K, V>>> {
        match self.position {
            Position::Exhausted => Ok(None),
            Position::Start => {
                let target = match self.direction {
                    Direction::Forward => Target::Leftmost,
                    Direction::Backward => Target::Rightmost,
                };
                self.tree.locate_leaf_write(target).map(Some)
            }
            Position::Seek => self.seek().map(Some),
            Position::Page { page_id, version } => {
                if let Some(guard) = self.tree.write_if_live(page_id)? {
                    if guard.structural_version() == version && guard.is_leaf() {
                        return Ok(Some(guard));
                    }
                }
                trace!(page_id, version, "leaf changed since last visit");
                self.seek().map(Some)
            }
        }
    }

    /// Descends to the leaf covering the key bound.
    fn seek(&self) -> TreeResult<WriteGuard<K, V>> {
        Counters::bump(&self.tree.counters.renavigations);
        let tree = self.tree;
        let target = match (&self.bound, self.direction) {
            (Some(bound), _) => Target::Key(bound),
            (None, Direction::Forward) => Target::Leftmost,
            (None, Direction::Backward) => Target::Rightmost,
        };
        trace!(bound = ?self.bound, "re-navigating sweep cursor");
        tree.locate_leaf_write(target)
    }

    /// Runs the predicate over the unvisited entries of `leaf` in sweep order
    /// and removes the matches. Returns the key to repair the leaf by if
    /// anything was removed from it.
    fn scan_leaf(&mut self, leaf: &mut WriteGuard<K, V>) -> TreeResult<Option<K>> {
        let node = leaf_mut(leaf)?;
        let queued_before = self.removed.len();

        match self.direction {
            Direction::Forward => {
                let mut index = match &self.bound {
                    Some(bound) => node.first_after(bound),
                    None => 0,
                };
                while index < node.len() {
                    let (key, value) = node.slot(index);
                    self.visited_count += 1;
                    match (self.predicate)(Entry { key, value }) {
                        Ok(true) => {
                            let (key, value) = node.remove_slot(index);
                            self.take(key, value);
                        }
                        Ok(false) => {
                            self.bound = Some(key.clone());
                            index += 1;
                        }
                        Err(source) => {
                            self.fail(source);
                            break;
                        }
                    }
                }
            }
            Direction::Backward => {
                let mut index = match &self.bound {
                    Some(bound) => node.count_before(bound),
                    None => node.len(),
                };
                while index > 0 {
                    index -= 1;
                    let (key, value) = node.slot(index);
                    self.visited_count += 1;
                    match (self.predicate)(Entry { key, value }) {
                        Ok(true) => {
                            let (key, value) = node.remove_slot(index);
                            self.take(key, value);
                        }
                        Ok(false) => self.bound = Some(key.clone()),
                        Err(source) => {
                            self.fail(source);
                            break;
                        }
                    }
                }
            }
        }

        if self.removed.len() == queued_before {
            return Ok(None);
        }
        let hint = match node.first_key() {
            Some(key) => Some(key.clone()),
            None => self.removed.back().map(|(key, _)| key.clone()),
        };
        Ok(hint)
    }

    fn take(&mut self, key: K, value: V) {
        self.bound = Some(key.clone());
        self.tree.len.fetch_sub(1, Ordering::AcqRel);
        self.removed_count += 1;
        self.removed.push_back((key, value));
    }

    fn fail(&mut self, source: PredicateError) {
        let last_key = self.bound.as_ref().map(|key| format!("{key:?}"));
        debug!(?last_key, %source, "sweep predicate failed");
        self.pending_failure = Some(TreeError::PredicateFailure { last_key, source });
    }

    /// Couples from `leaf` to its neighbour in sweep direction. Returns
    /// `None` at the end of the chain or when the cursor must re-navigate.
    fn step(&mut self, leaf: WriteGuard<K, V>) -> TreeResult<Option<WriteGuard<K, V>>> {
        let leaf_id = leaf.page_id();
        let node = leaf_ref(leaf_id, &leaf)?;

        let neighbour_id = match self.direction {
            Direction::Forward => node.next(),
            Direction::Backward => node.prev(),
        };
        if neighbour_id == INVALID_PAGE_ID {
            drop(leaf);
            self.finish();
            return Ok(None);
        }

        let neighbour = match self.direction {
            Direction::Forward => {
                // Acquire next before releasing the current leaf
                let next = self.tree.write_if_live(neighbour_id)?;
                drop(leaf);
                next
            }
            Direction::Backward => match self.tree.store.try_write(neighbour_id)? {
                Some(prev) => {
                    drop(leaf);
                    Some(prev).filter(|guard| !guard.is_retired())
                }
                None => {
                    // Leaves are latched left to right; back off before
                    // waiting on the left neighbour, then confirm it still
                    // precedes the leaf we came from.
                    drop(leaf);
                    self.tree.write_if_live(neighbour_id)?.filter(|prev| {
                        prev.as_leaf().map(|prev| prev.next()) == Some(leaf_id)
                    })
                }
            },
        };

        if neighbour.is_none() {
            self.position = Position::Seek;
        }
        Ok(neighbour)
    }

    fn finish(&mut self) {
        self.position = Position::Exhausted;
        debug!(
            direction = ?self.direction,
            removed = self.removed_count,
            visited = self.visited_count,
            "sweep finished"
        );
    }
}

impl<K, V> Iterator for SweepCursor<'_, K, V>
where
    K: Ord + Clone + Debug,
{
    type Item = TreeResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(true) => self.current.take().map(Ok),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<K: Debug, V> fmt::Debug for SweepCursor<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweepCursor")
            .field("direction", &self.direction)
            .field("position", &self.position)
            .field("bound", &self.bound)
            .field("queued", &self.removed.len())
            .field("removed_count", &self.removed_count)
            .field("failed", &self.failed)
            .finish()
    }
}

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + Debug,
{
    /// Removes every entry matching `predicate`, visiting keys in
    /// `direction` order.
    ///
    /// Removal happens one leaf at a time: the first [`SweepCursor::advance`]
    /// that reaches a leaf removes every match in it, then yields them one
    /// per call. Dropping the cursor early loses the removed entries it has
    /// not yielded yet; see [`SweepCursor::removed_count`]. Leaves not
    /// reached yet stay untouched.
    pub fn sweep<'t, F>(&'t self, mut predicate: F, direction: Direction) -> SweepCursor<'t, K, V>
    where
        F: FnMut(Entry<'_, K, V>) -> bool + 't,
    {
        SweepCursor::new(
            self,
            direction,
            Box::new(move |entry: Entry<'_, K, V>| Ok::<_, PredicateError>(predicate(entry))),
        )
    }

    /// Like [`Self::sweep`] with a predicate that can fail. A failure stops
    /// the sweep and surfaces as [`TreeError::PredicateFailure`].
    pub fn try_sweep<'t, F, E>(&'t self, mut predicate: F, direction: Direction) -> SweepCursor<'t, K, V>
    where
        F: FnMut(Entry<'_, K, V>) -> Result<bool, E> + 't,
        E: Into<PredicateError>,
    {
        SweepCursor::new(
            self,
            direction,
            Box::new(move |entry: Entry<'_, K, V>| -> Result<bool, PredicateError> {
                predicate(entry).map_err(Into::into)
            }),
        )
    }

    /// Removes every entry matching `predicate` and returns how many were
    /// removed.
    pub fn sweep_count<F>(&self, predicate: F, direction: Direction) -> TreeResult<usize>
    where
        F: FnMut(Entry<'_, K, V>) -> bool,
    {
        let mut cursor = self.sweep(predicate, direction);
        while cursor.advance()? {}
        Ok(cursor.removed_count())
    }
}
