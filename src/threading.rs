//! Pre-order traversal of a reply thread.
//!
//! Threads are already linked in the connectivity store, so materializing
//! one is a depth-first walk over `children` lists. The walk keeps its own
//! worklist instead of recursing, which keeps arbitrarily deep reply chains
//! safe, and it yields nodes lazily so a caller that only displays the first
//! screen of a huge thread never touches the rest.

use crate::error::{ArchiveError, Result};
use crate::model::message::MessageIndex;
use crate::store::connectivity::Connectivity;

/// One message in a walked thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ThreadNode {
    pub index: MessageIndex,
    /// Parent within the walk; for an included root, its stored parent.
    pub parent: Option<MessageIndex>,
    /// Distance from the walk root (root = 0, its replies = 1, ...).
    pub depth: usize,
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    /// Yield this message, then queue its children.
    Visit(MessageIndex),
    /// Queue the root's children without yielding the root.
    Expand(MessageIndex),
    /// All children of the innermost ancestor are done.
    Pop,
}

/// Lazy pre-order iterator over a thread.
///
/// Children are pushed in reverse so they come out in stored order. A
/// `Pop` frame sits below each expanded node's children and unwinds the
/// ancestor stack once they are exhausted, which is what gives every node
/// its parent and depth.
#[derive(Clone)]
pub struct ThreadWalker<'a> {
    conn: &'a Connectivity,
    root: MessageIndex,
    include_root: bool,
    stack: Vec<Frame>,
    ancestors: Vec<MessageIndex>,
    yielded: usize,
}

impl<'a> ThreadWalker<'a> {
    /// Walk the descendants of `root`, not `root` itself.
    pub fn new(conn: &'a Connectivity, root: MessageIndex) -> Self {
        Self::with_root(conn, root, false)
    }

    /// Walk `root` first, then its descendants.
    pub fn including_root(conn: &'a Connectivity, root: MessageIndex) -> Self {
        Self::with_root(conn, root, true)
    }

    fn with_root(conn: &'a Connectivity, root: MessageIndex, include_root: bool) -> Self {
        let mut walker = Self {
            conn,
            root,
            include_root,
            stack: Vec::new(),
            ancestors: Vec::new(),
            yielded: 0,
        };
        walker.reset();
        walker
    }

    pub fn root(&self) -> MessageIndex {
        self.root
    }

    /// Restart the walk from the beginning.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.ancestors.clear();
        self.yielded = 0;
        self.stack.push(if self.include_root {
            Frame::Visit(self.root)
        } else {
            Frame::Expand(self.root)
        });
    }

    fn expand(&mut self, index: MessageIndex) -> Result<()> {
        let children = self.conn.children(index)?;
        if !children.is_empty() {
            self.stack.push(Frame::Pop);
            self.stack.extend(children.iter().rev().map(Frame::Visit));
            self.ancestors.push(index);
        }
        Ok(())
    }

    fn fail(&mut self, err: ArchiveError) -> Option<Result<ThreadNode>> {
        self.stack.clear();
        Some(Err(err))
    }
}

impl Iterator for ThreadWalker<'_> {
    type Item = Result<ThreadNode>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stack.pop()? {
                Frame::Pop => {
                    self.ancestors.pop();
                }
                Frame::Expand(index) => {
                    if let Err(e) = self.expand(index) {
                        return self.fail(e);
                    }
                }
                Frame::Visit(index) => {
                    self.yielded += 1;
                    if self.yielded > self.conn.len() {
                        let err = ArchiveError::invalid(
                            "conndata",
                            format!("reply graph below message {} is not a tree", self.root),
                        );
                        return self.fail(err);
                    }
                    let depth = self.ancestors.len();
                    let parent = match self.ancestors.last() {
                        Some(&p) => Some(p),
                        None => match self.conn.parent(index) {
                            Ok(p) => p,
                            Err(e) => return self.fail(e),
                        },
                    };
                    if let Err(e) = self.expand(index) {
                        return self.fail(e);
                    }
                    return Some(Ok(ThreadNode {
                        index,
                        parent,
                        depth,
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::connectivity::tests::make_conn;

    //      0
    //     / \
    //    1   4
    //   / \
    //  2   3
    fn sample() -> Connectivity {
        make_conn(
            &[
                (0, -1, &[1, 4]),
                (0, 0, &[2, 3]),
                (0, 1, &[]),
                (0, 1, &[]),
                (0, 0, &[]),
                (0, -1, &[]),
            ],
            &[0, 5],
        )
    }

    fn collect(walker: ThreadWalker<'_>) -> Vec<(u32, Option<u32>, usize)> {
        walker
            .map(|n| n.map(|n| (n.index, n.parent, n.depth)).unwrap())
            .collect()
    }

    #[test]
    fn test_descendants_in_pre_order() {
        let conn = sample();
        assert_eq!(
            collect(ThreadWalker::new(&conn, 0)),
            vec![(1, Some(0), 1), (2, Some(1), 2), (3, Some(1), 2), (4, Some(0), 1)]
        );
    }

    #[test]
    fn test_including_root() {
        let conn = sample();
        let nodes = collect(ThreadWalker::including_root(&conn, 0));
        assert_eq!(nodes[0], (0, None, 0));
        assert_eq!(nodes.len(), 5);
        assert_eq!(nodes[4], (4, Some(0), 1));

        // An inner root reports its stored parent
        let nodes = collect(ThreadWalker::including_root(&conn, 1));
        assert_eq!(nodes, vec![(1, Some(0), 0), (2, Some(1), 1), (3, Some(1), 1)]);
    }

    #[test]
    fn test_leaf_has_no_descendants() {
        let conn = sample();
        assert!(collect(ThreadWalker::new(&conn, 5)).is_empty());
        assert_eq!(collect(ThreadWalker::including_root(&conn, 5)), vec![(5, None, 0)]);
    }

    #[test]
    fn test_reset_and_clone_restart() {
        let conn = sample();
        let mut walker = ThreadWalker::new(&conn, 0);
        let copy = walker.clone();
        let first: Vec<_> = walker.by_ref().take(2).map(|n| n.unwrap().index).collect();
        assert_eq!(first, vec![1, 2]);
        walker.reset();
        assert_eq!(collect(walker), collect(copy));
    }

    #[test]
    fn test_out_of_range_root() {
        let conn = sample();
        let mut walker = ThreadWalker::new(&conn, 99);
        assert!(matches!(walker.next(), Some(Err(ArchiveError::OutOfRange { .. }))));
        assert!(walker.next().is_none());
    }

    #[test]
    fn test_shared_child_is_reported() {
        let conn = make_conn(&[(0, -1, &[1, 2]), (0, 0, &[2]), (0, 1, &[])], &[0]);
        let results: Vec<_> = ThreadWalker::including_root(&conn, 0).collect();
        match results.last() {
            Some(Err(e)) => assert!(e.to_string().contains("not a tree"), "{e}"),
            other => panic!("expected an error, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_is_reported() {
        let conn = make_conn(&[(0, 1, &[1]), (0, 0, &[0])], &[]);
        let results: Vec<_> = ThreadWalker::new(&conn, 0).collect();
        assert!(results.last().unwrap().is_err());
    }

    #[test]
    fn test_deep_chain() {
        const N: u32 = 100_000;
        let children: Vec<[u32; 1]> = (1..N).map(|i| [i]).collect();
        let records: Vec<(u32, i32, &[u32])> = (0..N)
            .map(|i| {
                let parent = i as i32 - 1;
                let kids: &[u32] = children.get(i as usize).map_or(&[][..], |c| &c[..]);
                (i, parent, kids)
            })
            .collect();
        let conn = make_conn(&records, &[0]);

        let mut count = 0u32;
        for node in ThreadWalker::new(&conn, 0) {
            let node = node.unwrap();
            count += 1;
            assert_eq!(node.index, count);
            assert_eq!(node.depth, count as usize);
            assert_eq!(node.parent, Some(count - 1));
        }
        assert_eq!(count, N - 1);
    }
}
