// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

//! Call-tree reconstruction.
//!
//! A transaction records segments as a flat, creation-ordered list in which
//! every parent precedes its children. Tree structure is reconstructed once,
//! at transform time, off the hot path. The input ordering is what makes the
//! single pass work; nothing here may reorder it.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::segment::Segment;
use crate::segment::SegmentId;

/// A finalized node of the reconstructed call tree.
#[derive(Debug)]
pub struct ImmutableSegmentTreeNode {
    segment: Arc<Segment>,
    children: Vec<ImmutableSegmentTreeNode>,
    total_child_duration: Duration,
}

impl ImmutableSegmentTreeNode {
    #[inline]
    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    #[inline]
    pub fn children(&self) -> &[ImmutableSegmentTreeNode] {
        &self.children
    }

    /// Sum of this node's children's durations, precomputed at tree build
    /// time for exclusive-time reporting downstream.
    #[inline]
    pub fn total_child_duration(&self) -> Duration {
        self.total_child_duration
    }

    /// This node's own duration minus its children's, never negative.
    pub fn exclusive_duration(&self) -> Duration {
        self.segment
            .duration_or_zero()
            .saturating_sub(self.total_child_duration)
    }
}

/// Reconstructs the forest of segment trees from a transaction's flat
/// segment list and merges adjacent combinable siblings.
///
/// Normally the result is a single root, but instrumentation bugs can
/// produce several; both orphaned children (their parent slot was capped
/// out or the list was truncated) and multiple roots are tolerated without
/// failing.
pub fn build_segment_trees(segments: &[Option<Arc<Segment>>]) -> Vec<ImmutableSegmentTreeNode> {
    let mut arena: Vec<BuilderNode> = Vec::with_capacity(segments.len());
    let mut index_of: HashMap<SegmentId, usize> = HashMap::with_capacity(segments.len());
    let mut roots: Vec<usize> = Vec::new();
    let mut previous: Option<(SegmentId, usize)> = None;

    for segment in segments.iter().flatten() {
        let index = arena.len();
        arena.push(BuilderNode {
            segment: segment.clone(),
            children: Vec::new(),
        });
        index_of.insert(segment.id(), index);

        match segment.parent_id() {
            None => roots.push(index),
            Some(parent_id) => {
                // Cheap common case: the immediately preceding segment is the
                // parent. Fall back to the id map otherwise.
                let parent_index = match previous {
                    Some((previous_id, previous_index)) if previous_id == parent_id => {
                        Some(previous_index)
                    }
                    _ => index_of.get(&parent_id).copied(),
                };
                match parent_index {
                    Some(parent_index) => arena[parent_index].children.push(index),
                    None => {
                        // Data corruption or a capped-out parent slot. Drop
                        // the link rather than crash the host application.
                        warn!(
                            "segment {:?} references unresolvable parent {:?}; dropping it from the tree",
                            segment.id(),
                            parent_id
                        );
                    }
                }
            }
        }

        previous = Some((segment.id(), index));
    }

    roots
        .into_iter()
        .map(|root| finalize(&arena, root))
        .collect()
}

struct BuilderNode {
    segment: Arc<Segment>,
    children: Vec<usize>,
}

fn finalize(arena: &[BuilderNode], index: usize) -> ImmutableSegmentTreeNode {
    let node = &arena[index];
    let children = combine_children(arena, &node.children);
    let total_child_duration = children
        .iter()
        .map(|child| child.segment.duration_or_zero())
        .sum();

    ImmutableSegmentTreeNode {
        segment: node.segment.clone(),
        children,
        total_child_duration,
    }
}

/// Builds a node's immutable children, merging runs of *adjacent* siblings
/// that are combinable and mutually similar. Non-adjacent duplicates are
/// intentionally not merged; adjacency in creation order keeps this pass
/// O(n).
fn combine_children(arena: &[BuilderNode], children: &[usize]) -> Vec<ImmutableSegmentTreeNode> {
    let mut result = Vec::with_capacity(children.len());
    let mut position = 0;

    while position < children.len() {
        let head = &arena[children[position]];
        let mut run_end = position + 1;
        while run_end < children.len()
            && head
                .segment
                .is_combinable_with(&arena[children[run_end]].segment)
        {
            run_end += 1;
        }

        if run_end - position >= 2 {
            result.push(merge_run(arena, &children[position..run_end]));
        } else {
            result.push(finalize(arena, children[position]));
        }
        position = run_end;
    }

    result
}

fn merge_run(arena: &[BuilderNode], run: &[usize]) -> ImmutableSegmentTreeNode {
    let start = run
        .iter()
        .map(|&index| arena[index].segment.relative_start())
        .min()
        .unwrap_or(Duration::ZERO);
    let duration = run
        .iter()
        .map(|&index| arena[index].segment.duration_or_zero())
        .sum();

    // First-wins merge of the members' parameters, plus the call count.
    let mut parameters: Vec<(Cow<'static, str>, String)> = Vec::new();
    for &index in run {
        for (key, value) in arena[index].segment.parameters() {
            if !parameters.iter().any(|(existing, _)| *existing == key) {
                parameters.push((key, value));
            }
        }
    }
    parameters.push(("call_count".into(), run.len().to_string()));

    let merged = Arc::new(arena[run[0]]
        .segment
        .create_similar(start, duration, parameters));

    // The merged node adopts the union of all members' children, in order.
    let mut children = Vec::new();
    for &index in run {
        children.extend(combine_children(arena, &arena[index].children));
    }
    let total_child_duration = children
        .iter()
        .map(|child: &ImmutableSegmentTreeNode| child.segment.duration_or_zero())
        .sum();

    ImmutableSegmentTreeNode {
        segment: merged,
        children,
        total_child_duration,
    }
}
