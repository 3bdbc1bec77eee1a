//! Ascending queue of the cards that have not been played yet.
//!
//! The queue holds exactly the cards dealt this round that have not been
//! accepted onto the board. After dealing (`enqueue` per card plus one
//! `sort_ascending`), `peek` returns the smallest remaining card, the
//! single source of truth for what may legally be played next.
//!
//! The queue has no locking of its own; it is only touched while the
//! caller holds the game engine's write lock.

use shared::Card;

#[derive(Debug, Default)]
pub struct CardQueue {
    /// Ascending after `sort_ascending`; the front is the minimum.
    cards: Vec<Card>,
}

impl CardQueue {
    pub fn new() -> Self {
        Self { cards: Vec::new() }
    }

    /// Appends a card. The queue is unordered until `sort_ascending`.
    pub fn enqueue(&mut self, card: Card) {
        self.cards.push(card);
    }

    /// Removes and returns the front card, or `None` if empty.
    pub fn dequeue(&mut self) -> Option<Card> {
        if self.cards.is_empty() {
            None
        } else {
            Some(self.cards.remove(0))
        }
    }

    /// Returns the front card without removing it.
    pub fn peek(&self) -> Option<Card> {
        self.cards.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Drops all elements, ready for the next round's deal.
    pub fn reset(&mut self) {
        self.cards.clear();
    }

    pub fn sort_ascending(&mut self) {
        self.cards.sort_unstable();
    }

    /// Snapshot of the remaining cards, in queue order.
    pub fn remaining(&self) -> &[Card] {
        &self.cards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_queue() {
        let mut queue = CardQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.peek(), None);
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_peek_is_minimum_after_sort() {
        let mut queue = CardQueue::new();
        for card in [42, 7, 85, 13] {
            queue.enqueue(card);
        }
        queue.sort_ascending();

        assert_eq!(queue.peek(), Some(7));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_dequeue_yields_ascending_order() {
        let mut queue = CardQueue::new();
        for card in [50, 3, 99, 27] {
            queue.enqueue(card);
        }
        queue.sort_ascending();

        let mut drained = Vec::new();
        while let Some(card) = queue.dequeue() {
            drained.push(card);
        }
        assert_eq!(drained, vec![3, 27, 50, 99]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut queue = CardQueue::new();
        queue.enqueue(5);
        queue.sort_ascending();

        assert_eq!(queue.peek(), Some(5));
        assert_eq!(queue.peek(), Some(5));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut queue = CardQueue::new();
        for card in 1..=10 {
            queue.enqueue(card);
        }
        queue.reset();

        assert!(queue.is_empty());
        assert_eq!(queue.peek(), None);
    }
}
