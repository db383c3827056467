//! Pending object replacements queued up before a write.

use crate::reference::ObjRef;

/// One pending replacement: `ref` should read as `new_body` once rendered.
#[derive(Debug, Clone)]
pub struct Patch {
    pub obj_ref: ObjRef,
    pub new_body: Vec<u8>,
}

/// Ordered buffer of patches. Appends are O(1); rendering collapses
/// multiple patches to the same reference to the latest body while
/// preserving the insertion order of distinct references.
#[derive(Debug, Default)]
pub struct PatchQueue {
    patches: Vec<Patch>,
}

impl PatchQueue {
    pub fn new() -> Self {
        PatchQueue { patches: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Records that `obj_ref` should read as `new_body`. A later enqueue
    /// for the same reference overrides an earlier one at render time.
    pub fn enqueue(&mut self, obj_ref: ObjRef, new_body: Vec<u8>) {
        self.patches.push(Patch { obj_ref, new_body });
    }

    /// Returns the most recently enqueued body for `obj_ref`, if any.
    pub fn get(&self, obj_ref: ObjRef) -> Option<&[u8]> {
        self.patches
            .iter()
            .rev()
            .find(|p| p.obj_ref == obj_ref)
            .map(|p| p.new_body.as_slice())
    }

    /// Deduplicates by reference, keeping the last-enqueued body per ref
    /// and preserving the insertion order of each ref's first occurrence.
    pub fn render(&self) -> Vec<(ObjRef, Vec<u8>)> {
        let mut order: Vec<ObjRef> = Vec::new();
        for p in &self.patches {
            if !order.contains(&p.obj_ref) {
                order.push(p.obj_ref);
            }
        }
        order
            .into_iter()
            .map(|r| (r, self.get(r).expect("ref came from our own patches").to_vec()))
            .collect()
    }

    /// Empties the queue. Called after every successful `write_incremental`
    /// or `write_full`.
    pub fn clear(&mut self) {
        self.patches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut q = PatchQueue::new();
        q.enqueue(ObjRef::new(1, 0), b"a".to_vec());
        q.enqueue(ObjRef::new(1, 0), b"b".to_vec());
        assert_eq!(q.get(ObjRef::new(1, 0)), Some(&b"b"[..]));
    }

    #[test]
    fn render_dedupes_and_preserves_first_seen_order() {
        let mut q = PatchQueue::new();
        q.enqueue(ObjRef::new(2, 0), b"x".to_vec());
        q.enqueue(ObjRef::new(1, 0), b"y".to_vec());
        q.enqueue(ObjRef::new(2, 0), b"z".to_vec());

        let rendered = q.render();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].0, ObjRef::new(2, 0));
        assert_eq!(rendered[0].1, b"z");
        assert_eq!(rendered[1].0, ObjRef::new(1, 0));
        assert_eq!(rendered[1].1, b"y");
    }

    #[test]
    fn clear_empties_queue() {
        let mut q = PatchQueue::new();
        q.enqueue(ObjRef::new(1, 0), b"a".to_vec());
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.get(ObjRef::new(1, 0)), None);
    }
}
