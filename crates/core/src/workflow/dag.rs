use crate::error::WorkflowError;
use crate::types::{EdgeDef, NodeDef, NodeId, NodeType, WorkflowGraph};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// DAG view over a workflow definition.
///
/// Edge weights are positions in `WorkflowGraph::edges`, so incoming edges can
/// be replayed in definition order.
pub struct WorkflowDag<'a> {
    graph: DiGraph<&'a NodeDef, usize>,
    node_indices: HashMap<NodeId, NodeIndex>,
    edges: &'a [EdgeDef],
}

impl<'a> WorkflowDag<'a> {
    /// Build a DAG from a workflow definition, rejecting duplicate ids and
    /// edges that reference undefined nodes
    pub fn from_graph(workflow: &'a WorkflowGraph) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();

        for node in &workflow.nodes {
            if node_indices.contains_key(&node.id) {
                return Err(WorkflowError::Structural(format!(
                    "Duplicate node id {}",
                    node.id
                )));
            }
            validate_children(node)?;
            let idx = graph.add_node(node);
            node_indices.insert(node.id.clone(), idx);
        }

        for (position, edge) in workflow.edges.iter().enumerate() {
            let referenced_by = format!("edge {} -> {}", edge.source, edge.target);
            let source = node_indices
                .get(&edge.source)
                .ok_or_else(|| WorkflowError::missing_node(&edge.source, &referenced_by))?;
            let target = node_indices
                .get(&edge.target)
                .ok_or_else(|| WorkflowError::missing_node(&edge.target, &referenced_by))?;

            graph.add_edge(*source, *target, position);
        }

        Ok(Self {
            graph,
            node_indices,
            edges: &workflow.edges,
        })
    }

    /// Nodes in an order where every node comes after all nodes with an edge
    /// targeting it.
    ///
    /// Post-order depth-first visit from every node in definition order, with
    /// three-colour marking so a cycle is reported instead of recursing forever.
    pub fn execution_order(&self) -> Result<Vec<&'a NodeDef>, WorkflowError> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut order = Vec::with_capacity(self.graph.node_count());

        for idx in self.graph.node_indices() {
            self.visit(idx, &mut marks, &mut order)?;
        }

        Ok(order.into_iter().map(|idx| self.graph[idx]).collect())
    }

    fn visit(
        &self,
        idx: NodeIndex,
        marks: &mut [Mark],
        order: &mut Vec<NodeIndex>,
    ) -> Result<(), WorkflowError> {
        match marks[idx.index()] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(WorkflowError::cycle(&self.graph[idx].id)),
            Mark::Unvisited => {}
        }

        marks[idx.index()] = Mark::InProgress;
        for dep in self.dependency_indices(idx) {
            self.visit(dep, marks, order)?;
        }
        marks[idx.index()] = Mark::Done;
        order.push(idx);

        Ok(())
    }

    fn dependency_indices(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut incoming: Vec<(usize, NodeIndex)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (*e.weight(), e.source()))
            .collect();
        incoming.sort_by_key(|(position, _)| *position);
        incoming.into_iter().map(|(_, source)| source).collect()
    }

    fn index_of(&self, node_id: &NodeId) -> Result<NodeIndex, WorkflowError> {
        self.node_indices
            .get(node_id)
            .copied()
            .ok_or_else(|| WorkflowError::Structural(format!("Node {} not found", node_id)))
    }

    /// Edges targeting a node, in definition order
    pub fn incoming_edges(&self, node_id: &NodeId) -> Result<Vec<&'a EdgeDef>, WorkflowError> {
        let idx = self.index_of(node_id)?;
        let mut positions: Vec<usize> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| *e.weight())
            .collect();
        positions.sort_unstable();

        let edges = self.edges;
        Ok(positions.into_iter().map(|p| &edges[p]).collect())
    }

    /// Get dependencies for a node
    pub fn dependencies(&self, node_id: &NodeId) -> Result<Vec<NodeId>, WorkflowError> {
        let idx = self.index_of(node_id)?;
        Ok(self
            .dependency_indices(idx)
            .into_iter()
            .map(|n| self.graph[n].id.clone())
            .collect())
    }

    /// Get nodes that depend on the given node
    pub fn dependents(&self, node_id: &NodeId) -> Result<Vec<NodeId>, WorkflowError> {
        let idx = self.index_of(node_id)?;
        Ok(self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].id.clone())
            .collect())
    }

    /// Nodes with no incoming edges
    pub fn entry_nodes(&self) -> Vec<&'a NodeDef> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n])
            .collect()
    }
}

/// Check structure of a definition without keeping the DAG around
pub fn validate(workflow: &WorkflowGraph) -> Result<(), WorkflowError> {
    WorkflowDag::from_graph(workflow)?.execution_order().map(|_| ())
}

fn validate_children(node: &NodeDef) -> Result<(), WorkflowError> {
    if node.children.is_empty() {
        return Ok(());
    }
    if node.kind != NodeType::Loop {
        return Err(WorkflowError::Structural(format!(
            "Node {} of type {} cannot have children",
            node.id, node.kind
        )));
    }

    let mut seen = HashSet::new();
    for child in &node.children {
        if !seen.insert(&child.id) {
            return Err(WorkflowError::Structural(format!(
                "Duplicate child id {} in loop {}",
                child.id, node.id
            )));
        }
        validate_children(child)?;
    }

    Ok(())
}
