//! Builds a course's flat node records into an arena forest.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::StructureError;
use crate::models::{EvalNode, InputType};

/// Points available in a course; the implicit parent of every root.
pub const COURSE_TOTAL: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct ForestNode {
    pub node: EvalNode,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Absolute share of the course total.
    pub effective_weight: f64,
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct Forest {
    course_id: Uuid,
    nodes: Vec<ForestNode>,
    roots: Vec<usize>,
    index: HashMap<Uuid, usize>,
    preorder: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    Fresh,
    OnPath,
    Done,
}

impl Forest {
    pub fn assemble(course_id: Uuid, records: Vec<EvalNode>) -> Result<Self, StructureError> {
        let mut index = HashMap::with_capacity(records.len());
        for (position, node) in records.iter().enumerate() {
            if node.course_id != course_id {
                return Err(StructureError::ForeignNode {
                    node: node.id,
                    expected: course_id,
                    found: node.course_id,
                });
            }
            if !node.weight.is_finite() || node.weight < 0.0 {
                return Err(StructureError::InvalidWeight {
                    node: node.id,
                    weight: node.weight,
                });
            }
            if !node.is_leaf && node.input_type != InputType::None {
                return Err(StructureError::ContainerInputType {
                    node: node.id,
                    input_type: node.input_type.to_string(),
                });
            }
            if index.insert(node.id, position).is_some() {
                return Err(StructureError::DuplicateNode(node.id));
            }
            if node.weight > COURSE_TOTAL {
                tracing::warn!(
                    node = %node.id,
                    weight = node.weight,
                    "weight above 100 is kept as authored"
                );
            }
        }

        let mut parents = Vec::with_capacity(records.len());
        for node in &records {
            let parent = match node.parent_id {
                None => None,
                Some(parent_id) => {
                    let &parent = index.get(&parent_id).ok_or(StructureError::UnknownParent {
                        node: node.id,
                        parent: parent_id,
                    })?;
                    if records[parent].is_leaf {
                        return Err(StructureError::LeafWithChildren {
                            leaf: parent_id,
                            child: node.id,
                        });
                    }
                    Some(parent)
                }
            };
            parents.push(parent);
        }

        detect_cycles(&records, &parents)?;

        let mut nodes: Vec<ForestNode> = records
            .into_iter()
            .zip(parents.iter())
            .map(|(node, &parent)| ForestNode {
                node,
                parent,
                children: Vec::new(),
                effective_weight: 0.0,
                depth: 0,
            })
            .collect();

        let mut roots = Vec::new();
        for (position, parent) in parents.iter().enumerate() {
            match parent {
                Some(parent) => nodes[*parent].children.push(position),
                None => roots.push(position),
            }
        }

        sort_siblings(&nodes, &mut roots);
        for position in 0..nodes.len() {
            let mut children = std::mem::take(&mut nodes[position].children);
            sort_siblings(&nodes, &mut children);
            nodes[position].children = children;
        }

        // Roots come off the stack in display order; children are pushed
        // reversed so the traversal is a true pre-order.
        let mut preorder = Vec::with_capacity(nodes.len());
        let mut stack: Vec<(usize, f64, usize)> = roots
            .iter()
            .rev()
            .map(|&root| (root, COURSE_TOTAL, 0))
            .collect();
        while let Some((position, parent_weight, depth)) = stack.pop() {
            let entry = &mut nodes[position];
            entry.effective_weight = entry.node.weight / 100.0 * parent_weight;
            entry.depth = depth;
            preorder.push(position);
            let weight = entry.effective_weight;
            for &child in entry.children.iter().rev() {
                stack.push((child, weight, depth + 1));
            }
        }

        tracing::debug!(
            course = %course_id,
            nodes = nodes.len(),
            roots = roots.len(),
            "assembled grading tree"
        );

        Ok(Self {
            course_id,
            nodes,
            roots,
            index,
            preorder,
        })
    }

    pub fn course_id(&self) -> Uuid {
        self.course_id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn get(&self, position: usize) -> &ForestNode {
        &self.nodes[position]
    }

    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn find(&self, id: Uuid) -> Option<&ForestNode> {
        self.position(id).map(|position| &self.nodes[position])
    }

    /// Node positions with every parent ahead of its children, siblings in
    /// display order.
    pub fn preorder(&self) -> &[usize] {
        &self.preorder
    }

    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        self.preorder
            .iter()
            .copied()
            .filter(|&position| self.nodes[position].node.is_leaf)
    }

    /// Sum of root effective weights, the ceiling for every course score.
    pub fn root_weight_total(&self) -> f64 {
        self.roots
            .iter()
            .map(|&root| self.nodes[root].effective_weight)
            .sum()
    }
}

fn sort_siblings(nodes: &[ForestNode], siblings: &mut [usize]) {
    siblings.sort_by(|&a, &b| {
        let (a, b) = (&nodes[a].node, &nodes[b].node);
        a.order
            .cmp(&b.order)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn detect_cycles(records: &[EvalNode], parents: &[Option<usize>]) -> Result<(), StructureError> {
    let mut state = vec![Visit::Fresh; records.len()];
    let mut path = Vec::new();

    for start in 0..records.len() {
        let mut current = Some(start);
        while let Some(position) = current {
            match state[position] {
                Visit::Done => break,
                Visit::OnPath => return Err(StructureError::Cycle(records[position].id)),
                Visit::Fresh => {
                    state[position] = Visit::OnPath;
                    path.push(position);
                    current = parents[position];
                }
            }
        }
        for position in path.drain(..) {
            state[position] = Visit::Done;
        }
    }

    Ok(())
}
