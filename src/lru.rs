use slab::Slab;

/// A bounded list of key-value pairs in most-recently-used order.
///
/// Keys are not hashed. Lookups scan from the most recently used entry
/// onwards with a caller-provided predicate, which is what makes custom
/// argument equality possible. Nodes live in a slab and are linked in both
/// directions, so promoting or evicting an entry does not move any others.
pub struct LruList<K, V> {
    /// The linked nodes.
    nodes: Slab<Node<K, V>>,
    /// The most recently used node.
    head: Option<usize>,
    /// The least recently used node.
    tail: Option<usize>,
    /// The maximum number of nodes.
    capacity: usize,
}

/// A node in the list.
struct Node<K, V> {
    key: K,
    value: V,
    /// The next more recently used node.
    prev: Option<usize>,
    /// The next less recently used node.
    next: Option<usize>,
}

impl<K, V> LruList<K, V> {
    /// Creates an empty list holding at most `capacity` entries.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self { nodes: Slab::new(), head: None, tail: None, capacity: capacity.max(1) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Finds the most recently used entry whose key matches and promotes it.
    pub fn get(&mut self, matches: impl FnMut(&K) -> bool) -> Option<&V> {
        let id = self.position(matches)?;
        self.promote(id);
        Some(&self.nodes[id].value)
    }

    /// The most recently used entry.
    pub fn front(&self) -> Option<(&K, &V)> {
        self.head.map(|id| {
            let node = &self.nodes[id];
            (&node.key, &node.value)
        })
    }

    /// Inserts an entry as the most recently used one.
    ///
    /// Returns the least recently used entry if it had to be evicted to stay
    /// within capacity.
    pub fn push_front(&mut self, key: K, value: V) -> Option<(K, V)> {
        let id = self.nodes.insert(Node { key, value, prev: None, next: None });
        self.link_front(id);
        if self.nodes.len() > self.capacity {
            let tail = self.tail?;
            self.unlink(tail);
            let node = self.nodes.remove(tail);
            return Some((node.key, node.value));
        }
        None
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = None;
        self.tail = None;
    }

    /// Iterates from the most to the least recently used entry.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter { list: self, cursor: self.head }
    }

    /// Scans for a matching key in most-recently-used order.
    fn position(&self, mut matches: impl FnMut(&K) -> bool) -> Option<usize> {
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let node = &self.nodes[id];
            if matches(&node.key) {
                return Some(id);
            }
            cursor = node.next;
        }
        None
    }

    /// Moves a node to the front.
    fn promote(&mut self, id: usize) {
        if self.head != Some(id) {
            self.unlink(id);
            self.link_front(id);
        }
    }

    /// Links a detached node in as the head.
    fn link_front(&mut self, id: usize) {
        let old = self.head;
        {
            let node = &mut self.nodes[id];
            node.prev = None;
            node.next = old;
        }
        match old {
            Some(old) => self.nodes[old].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
    }

    /// Detaches a node from its neighbours.
    fn unlink(&mut self, id: usize) {
        let (prev, next) = {
            let node = &mut self.nodes[id];
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.tail = prev,
        }
    }

    /// Checks the links against the slab.
    #[cfg(test)]
    fn assert_consistency(&self) {
        let mut count = 0;
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            assert_eq!(self.nodes[id].prev, prev);
            prev = Some(id);
            cursor = self.nodes[id].next;
            count += 1;
        }
        assert_eq!(self.tail, prev);
        assert_eq!(count, self.nodes.len());
        assert!(count <= self.capacity);
    }
}

/// An iterator over an [`LruList`] in most-recently-used order.
pub struct Iter<'a, K, V> {
    list: &'a LruList<K, V>,
    cursor: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = &self.list.nodes[self.cursor?];
        self.cursor = node.next;
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::Arbitrary;

    use super::*;

    fn keys(list: &LruList<char, u32>) -> String {
        list.iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn test_eviction_order() {
        let mut list = LruList::new(3);
        assert_eq!(list.push_front('a', 1), None);
        assert_eq!(list.push_front('b', 2), None);
        assert_eq!(list.push_front('c', 3), None);
        assert_eq!(keys(&list), "cba");

        // Touching `a` protects it from the next eviction.
        assert_eq!(list.get(|k| *k == 'a'), Some(&1));
        assert_eq!(keys(&list), "acb");
        assert_eq!(list.push_front('d', 4), Some(('b', 2)));
        assert_eq!(keys(&list), "dac");
        list.assert_consistency();
    }

    #[test]
    fn test_failed_get_keeps_order() {
        let mut list = LruList::new(2);
        list.push_front('a', 1);
        list.push_front('b', 2);
        assert_eq!(list.get(|k| *k == 'z'), None);
        assert_eq!(keys(&list), "ba");
        assert_eq!(list.front(), Some((&'b', &2)));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut list = LruList::new(0);
        assert_eq!(list.capacity(), 1);
        list.push_front('a', 1);
        assert_eq!(list.push_front('b', 2), Some(('a', 1)));
        assert_eq!(list.len(), 1);
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
        list.assert_consistency();
    }

    #[quickcheck_macros::quickcheck]
    fn test_arbitrary_quickcheck(capacity: u8, ops: Vec<Op>) {
        let capacity = usize::from(capacity % 8).max(1);
        let mut list = LruList::new(capacity);
        let mut model: Vec<(u8, u32)> = Vec::new();

        for op in ops {
            match op {
                Op::Get(key) => {
                    let expected = model.iter().position(|(k, _)| *k == key).map(|i| {
                        let pair = model.remove(i);
                        model.insert(0, pair);
                        pair.1
                    });
                    assert_eq!(list.get(|k| *k == key).copied(), expected);
                }
                Op::Push(key, value) => {
                    model.insert(0, (key, value));
                    let expected = (model.len() > capacity).then(|| model.pop()).flatten();
                    assert_eq!(list.push_front(key, value), expected);
                }
                Op::Clear => {
                    model.clear();
                    list.clear();
                }
            }

            list.assert_consistency();
            let actual: Vec<_> = list.iter().map(|(k, v)| (*k, *v)).collect();
            assert_eq!(actual, model);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Get(u8),
        Push(u8, u32),
        Clear,
    }

    impl Arbitrary for Op {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            // Small keys so that lookups actually hit.
            let key = u8::arbitrary(g) % 6;
            match g.choose(&[0, 0, 1, 1, 1, 2]) {
                Some(0) => Self::Get(key),
                Some(1) => Self::Push(key, Arbitrary::arbitrary(g)),
                _ => Self::Clear,
            }
        }
    }
}
