use std::collections::VecDeque;

use super::types::GeneratedContent;
use crate::movement::MovementMode;

/// Bounded playback queue plus a rolling history of everything generated.
///
/// Both evict oldest-first once full. Consuming an item removes it from the
/// queue but keeps it in history.
#[derive(Debug, Clone)]
pub struct ContentQueue {
    items: VecDeque<GeneratedContent>,
    history: VecDeque<GeneratedContent>,
    max_items: usize,
    max_history: usize,
    tie_epsilon: f64,
}

impl ContentQueue {
    pub fn new(max_items: usize, max_history: usize, tie_epsilon: f64) -> Self {
        Self {
            items: VecDeque::with_capacity(max_items),
            history: VecDeque::with_capacity(max_history),
            max_items: max_items.max(1),
            max_history: max_history.max(1),
            tie_epsilon,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn items(&self) -> impl Iterator<Item = &GeneratedContent> {
        self.items.iter()
    }

    pub fn history(&self) -> impl Iterator<Item = &GeneratedContent> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// History as a contiguous slice, oldest first.
    pub fn history_slice(&mut self) -> &[GeneratedContent] {
        self.history.make_contiguous()
    }

    /// Queue a new item and append it to history.
    pub fn push(&mut self, content: GeneratedContent) {
        self.items.push_back(content.clone());
        while self.items.len() > self.max_items {
            self.items.pop_front();
        }

        self.history.push_back(content);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    pub fn set_max_items(&mut self, max_items: usize) {
        self.max_items = max_items.max(1);
        while self.items.len() > self.max_items {
            self.items.pop_front();
        }
    }

    pub fn get(&self, id: &str) -> Option<&GeneratedContent> {
        self.items
            .iter()
            .find(|c| c.id == id)
            .or_else(|| self.history.iter().find(|c| c.id == id))
    }

    /// Queued items produced for exactly this mode.
    pub fn count_for_mode(&self, mode: MovementMode) -> usize {
        self.items.iter().filter(|c| c.movement_mode == mode).count()
    }

    /// Best queued item for `mode`.
    ///
    /// Considers items made for `mode` or one compatible calmer mode, highest
    /// priority first, newest first among near-ties. Falls back to the
    /// highest-priority item overall when nothing is compatible.
    pub fn select_next(&self, mode: MovementMode) -> Option<&GeneratedContent> {
        let best = self
            .items
            .iter()
            .filter(|c| mode.accepts(c.movement_mode))
            .fold(None, |best: Option<&GeneratedContent>, candidate| match best {
                Some(current) if !self.outranks(candidate, current) => Some(current),
                _ => Some(candidate),
            });

        best.or_else(|| {
            self.items
                .iter()
                .max_by(|a, b| a.priority.total_cmp(&b.priority))
        })
    }

    fn outranks(&self, candidate: &GeneratedContent, current: &GeneratedContent) -> bool {
        let delta = candidate.priority - current.priority;
        if delta.abs() < self.tie_epsilon {
            candidate.created_at > current.created_at
        } else {
            delta > 0.0
        }
    }

    pub fn mark_playing(&mut self, id: &str) {
        for item in self.items.iter_mut().chain(self.history.iter_mut()) {
            item.playing = item.id == id;
        }
    }

    /// Drop the item from the queue and clear its playing flag in history.
    pub fn mark_played(&mut self, id: &str) -> Option<GeneratedContent> {
        for item in self.history.iter_mut().filter(|c| c.id == id) {
            item.playing = false;
        }
        let position = self.items.iter().position(|c| c.id == id)?;
        self.items.remove(position)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// The newest `count` history items, oldest first.
    pub fn recent_history(&self, count: usize) -> Vec<GeneratedContent> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn restore_history(&mut self, items: Vec<GeneratedContent>) {
        self.history = items
            .into_iter()
            .map(|mut c| {
                c.playing = false;
                c
            })
            .collect();
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }
}
