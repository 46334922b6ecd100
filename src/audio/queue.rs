use rand::seq::SliceRandom;
use std::collections::VecDeque;
use tracing::debug;

use crate::sources::QueueEntry;

/// Cola de reproducción de una guild.
///
/// El índice 0 es el track que suena o el próximo en sonar. La cola no
/// impone tamaño máximo; ese límite lo aplica quien agrega.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    items: VecDeque<QueueEntry>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega al final
    pub fn append(&mut self, entry: QueueEntry) {
        debug!("➕ Agregado a la cola: {}", entry.info.title);
        self.items.push_back(entry);
    }

    /// Quita `min(count, len) - 1` entradas del frente.
    ///
    /// El track actual lo quita después el avance disparado por el stop,
    /// por eso se deja uno menos. `count <= 0` equivale a 1.
    pub fn skip(&mut self, count: i64) -> usize {
        let count = if count <= 0 { 1 } else { count as usize };
        let removed = count.min(self.items.len()).saturating_sub(1);
        self.items.drain(..removed);
        removed
    }

    /// Mezcla todo menos la cabeza
    pub fn shuffle_tail(&mut self) {
        if self.items.len() < 3 {
            return;
        }

        let mut rng = rand::thread_rng();
        self.items.make_contiguous()[1..].shuffle(&mut rng);
        debug!("🔀 Cola mezclada ({} entradas)", self.items.len() - 1);
    }

    /// Saca la cabeza al terminar un track.
    ///
    /// Con `repeat` la cabeza se copia al final antes de sacarla, si no
    /// se perdería con una cola de un solo elemento.
    pub fn pop_head_for_advance(&mut self, repeat: bool) -> Option<&QueueEntry> {
        if repeat {
            if let Some(head) = self.items.front().cloned() {
                self.items.push_back(head);
            }
        }

        self.items.pop_front();
        self.items.front()
    }

    pub fn head(&self) -> Option<&QueueEntry> {
        self.items.front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{DirectUrlSource, TrackInfo};
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;
    use std::sync::Arc;

    fn entry(title: &str) -> QueueEntry {
        QueueEntry::new(
            Arc::new(DirectUrlSource::new(format!("https://example.com/{}.mp3", title))),
            TrackInfo::new(title, UserId::new(7)),
        )
    }

    fn queue_of(titles: &[&str]) -> PlaybackQueue {
        let mut queue = PlaybackQueue::new();
        for title in titles {
            queue.append(entry(title));
        }
        queue
    }

    fn titles(queue: &PlaybackQueue) -> Vec<String> {
        queue.iter().map(|e| e.info.title.clone()).collect()
    }

    #[test]
    fn test_skip_leaves_current_for_advance() {
        let mut queue = queue_of(&["a", "b", "c", "d"]);
        assert_eq!(queue.skip(2), 1);
        assert_eq!(titles(&queue), vec!["b", "c", "d"]);

        let mut queue = queue_of(&["a", "b", "c"]);
        assert_eq!(queue.skip(0), 0);
        assert_eq!(queue.skip(-4), 0);
        assert_eq!(titles(&queue), vec!["a", "b", "c"]);

        assert_eq!(queue.skip(10), 2);
        assert_eq!(titles(&queue), vec!["c"]);
    }

    #[test]
    fn test_skip_on_empty_queue() {
        let mut queue = PlaybackQueue::new();
        assert_eq!(queue.skip(3), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shuffle_keeps_head_and_entries() {
        let names: Vec<String> = (0..20).map(|i| format!("t{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut queue = queue_of(&refs);

        queue.shuffle_tail();

        let mut shuffled = titles(&queue);
        assert_eq!(shuffled[0], "t0");
        shuffled.sort();
        let mut expected = names.clone();
        expected.sort();
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn test_pop_without_repeat() {
        let mut queue = queue_of(&["a", "b"]);
        assert_eq!(queue.pop_head_for_advance(false).unwrap().info.title, "b");
        assert!(queue.pop_head_for_advance(false).is_none());
        assert!(queue.pop_head_for_advance(false).is_none());
    }

    #[test]
    fn test_pop_with_repeat_requeues_before_shift() {
        let mut queue = queue_of(&["solo"]);
        let head_id = queue.head().unwrap().id();

        let next = queue.pop_head_for_advance(true).unwrap();
        assert_eq!(next.info.title, "solo");
        assert_eq!(next.id(), head_id);
        assert_eq!(queue.len(), 1);

        let mut queue = queue_of(&["a", "b", "c"]);
        for _ in 0..3 {
            queue.pop_head_for_advance(true);
        }
        assert_eq!(titles(&queue), vec!["a", "b", "c"]);
    }
}
