use crate::{
    config::GrowthConfig,
    error::{PoolError, Result},
    utils::Capacity,
};

/// Stable reference to a node of a [`List`].
///
/// Nodes live in a growable array that may be reallocated, so they are
/// referenced by index rather than by address. Every time a slot is retired
/// its generation is bumped, which means an id can never silently refer to a
/// node that later reused the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Position of the node's slot in the node heap.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Reference to a neighbouring node, if there is one.
pub(crate) type Link = Option<NodeId>;

pub(crate) struct Node<T> {
    /// Next node of the list
    pub next: Link,
    /// Previous node of the list
    pub prev: Link,
    /// Element of the node
    pub data: T,
}

struct Slot<T> {
    generation: u32,
    /// `None` while the slot is unused and waiting to be recycled.
    node: Option<Node<T>>,
}

/// Doubly-linked list whose nodes are kept in a single growable array (the
/// node heap).
///
/// ```text
///  slots:   [0]        [1]        [2]        [3]
///          +------+   +------+   +------+   +------+
///          | A    |   |unused|   | C    |   | B    |
///          +------+   +------+   +------+   +------+
///
///  list:   head -> A(0) <-> B(3) <-> C(2) <- tail
///  unused: [1]
/// ```
///
/// Retired slots go onto an `unused` stack and are handed out again before
/// the array is extended, so slot reuse is O(1).
pub(crate) struct List<T> {
    slots: Vec<Slot<T>>,
    unused: Vec<u32>,
    head: Link,
    tail: Link,
    len: usize,
    capacity: Capacity,
}

pub(crate) struct Iter<'a, T> {
    list: &'a List<T>,
    current: Link,
    remaining: usize,
}

impl<T> List<T> {
    /// Creates an empty list with the initial capacity of `growth` reserved.
    pub fn with_growth(growth: GrowthConfig) -> Result<Self> {
        let mut slots = Vec::new();
        let capacity = Capacity::reserve_initial(growth, &mut slots)?;

        let mut unused = Vec::new();
        unused
            .try_reserve_exact(capacity.get())
            .map_err(|_| PoolError::OutOfMemory)?;

        Ok(Self {
            slots,
            unused,
            head: None,
            tail: None,
            len: 0,
            capacity,
        })
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots the node heap can hold before it has to grow.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    #[inline]
    pub fn first(&self) -> Link {
        self.head
    }

    #[inline]
    pub fn last(&self) -> Link {
        self.tail
    }

    pub fn get(&self, id: NodeId) -> Option<&Node<T>> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    #[inline]
    pub fn data(&self, id: NodeId) -> Option<&T> {
        self.get(id).map(|node| &node.data)
    }

    #[inline]
    pub fn data_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.get_mut(id).map(|node| &mut node.data)
    }

    /// Makes sure one more node can be linked without reallocating later on.
    pub fn reserve_one(&mut self) -> Result<()> {
        if self.len >= u32::MAX as usize {
            return Err(PoolError::OutOfMemory);
        }

        if self.capacity.reserve_one(&mut self.slots, self.len)? {
            let missing = self.capacity.get().saturating_sub(self.unused.len());
            self.unused
                .try_reserve_exact(missing)
                .map_err(|_| PoolError::OutOfMemory)?;
        }

        Ok(())
    }

    /// Appends a new node at the end of the list.
    pub fn push_back(&mut self, data: T) -> Result<NodeId> {
        self.reserve_one()?;

        let tail = self.tail;
        let id = self.claim(Node { next: None, prev: tail, data });

        match tail.and_then(|tail| self.get_mut(tail)) {
            Some(tail) => tail.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);

        Ok(id)
    }

    /// Links a new node right after `at`.
    pub fn insert_after(&mut self, at: NodeId, data: T) -> Result<NodeId> {
        let next = self
            .get(at)
            .map(|node| node.next)
            .ok_or_else(|| PoolError::Inconsistent(format!("insert after dead node {at:?}")))?;

        self.reserve_one()?;

        let id = self.claim(Node { next, prev: Some(at), data });

        if let Some(node) = self.get_mut(at) {
            node.next = Some(id);
        }
        match next.and_then(|next| self.get_mut(next)) {
            Some(next) => next.prev = Some(id),
            None => self.tail = Some(id),
        }

        Ok(id)
    }

    /// Unlinks `id` and retires its slot, returning the node's data.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)?;
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);

        let Node { next, prev, data } = node;

        match prev.and_then(|prev| self.get_mut(prev)) {
            Some(node) => node.next = next,
            None => self.head = next,
        }
        match next.and_then(|next| self.get_mut(next)) {
            Some(node) => node.prev = prev,
            None => self.tail = prev,
        }

        self.unused.push(id.index);
        self.len -= 1;

        Some(data)
    }

    /// Iterates over the live nodes from head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            current: self.head,
            remaining: self.len,
        }
    }

    /// Places `node` in a recycled slot if there is one, otherwise in a fresh
    /// slot at the end of the array. Capacity must have been reserved.
    fn claim(&mut self, node: Node<T>) -> NodeId {
        self.len += 1;

        if let Some(index) = self.unused.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);

            return NodeId { index, generation: slot.generation };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, node: Some(node) });

        NodeId { index, generation: 0 }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let node = self.list.get(id)?;

        self.current = node.next;
        self.remaining -= 1;

        Some((id, &node.data))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = (NodeId, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
