//! Step dependency graph: arena construction and cycle detection.
//!
//! Steps are stored in an arena indexed by position; edges are adjacency
//! lists of arena indices pointing from a step to the steps it depends on.
//! Cycle detection is an iterative depth-first search with an explicit
//! frame stack and an "on stack" marker per node.

use std::collections::HashMap;

use provisio_types::workflow::WorkflowStep;

/// Visit state of a node during depth-first search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Arena of steps with index-based dependency edges.
///
/// Dangling dependency identifiers are dropped while building the graph;
/// reporting them is the validator's job.
#[derive(Debug)]
pub struct StepGraph<'a> {
    nodes: Vec<&'a WorkflowStep>,
    /// `edges[i]` holds the arena indices that node `i` depends on.
    edges: Vec<Vec<usize>>,
}

impl<'a> StepGraph<'a> {
    /// Build the arena from a step list.
    ///
    /// When identifiers repeat, the first occurrence owns the identifier.
    pub fn build(steps: &'a [WorkflowStep]) -> Self {
        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            index.entry(step.id.as_str()).or_insert(i);
        }

        let edges = steps
            .iter()
            .map(|step| {
                step.depends_on
                    .iter()
                    .filter_map(|dep| index.get(dep.as_str()).copied())
                    .collect()
            })
            .collect();

        Self {
            nodes: steps.iter().collect(),
            edges,
        }
    }

    /// Returns the identifier of a step that lies on a dependency cycle, if any.
    ///
    /// Runs a DFS from every unvisited node. A frame is `(node, next_edge)`;
    /// reaching a node that is still on the stack means a back edge, and the
    /// search stops at the first one found.
    pub fn find_cycle(&self) -> Option<&'a str> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::OnStack;
            stack.push((root, 0));

            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                if let Some(&dep) = self.edges[node].get(next) {
                    frame.1 += 1;
                    match marks[dep] {
                        Mark::OnStack => return Some(self.nodes[dep].id.as_str()),
                        Mark::Unvisited => {
                            marks[dep] = Mark::OnStack;
                            stack.push((dep, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }

        None
    }
}
