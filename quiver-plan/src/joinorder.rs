//! Join-order scaffolding: canonical relation sets, the set manager, the
//! filter-carrying query graph, and the plan memo.
//!
//! The end-to-end DP/greedy enumeration over these structures is not wired
//! yet; the optimizer builds the graph for diagnostics and leaves the join
//! tree as the binder produced it.

use std::fmt;
use std::sync::Arc;

use quiver_expr::Expr;
use rustc_hash::{FxHashMap, FxHashSet};

/// Canonicalized sorted tuple of relation tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinRelationSet {
    relations: Vec<u64>,
}

impl JoinRelationSet {
    pub fn new(mut relations: Vec<u64>) -> Self {
        relations.sort_unstable();
        relations.dedup();
        Self { relations }
    }

    pub fn relations(&self) -> &[u64] {
        &self.relations
    }

    pub fn is_subset_of(&self, other: &JoinRelationSet) -> bool {
        let set: FxHashSet<u64> = other.relations.iter().copied().collect();
        self.relations.iter().all(|r| set.contains(r))
    }
}

impl fmt::Display for JoinRelationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, r) in self.relations.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, "]")
    }
}

/// Interns relation sets so equal tag tuples share one canonical instance.
#[derive(Debug, Default)]
pub struct JoinRelationSetManager {
    sets: FxHashMap<Vec<u64>, Arc<JoinRelationSet>>,
}

impl JoinRelationSetManager {
    /// The canonical set for these tags, created on first use.
    pub fn get_relation(&mut self, tags: &[u64]) -> Arc<JoinRelationSet> {
        let set = JoinRelationSet::new(tags.to_vec());
        let key = set.relations.clone();
        Arc::clone(
            self.sets
                .entry(key)
                .or_insert_with(|| Arc::new(set)),
        )
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl fmt::Display for JoinRelationSetManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.sets.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(f, "{}", self.sets[key])?;
        }
        Ok(())
    }
}

/// A directed, filter-carrying edge of the query graph.
#[derive(Debug, Clone)]
pub struct EdgeInfo {
    pub neighbor: Arc<JoinRelationSet>,
    pub filters: Vec<Expr>,
}

/// Directed query graph over join relation sets.
#[derive(Debug, Default)]
pub struct QueryGraph {
    edges: FxHashMap<Vec<u64>, Vec<EdgeInfo>>,
}

impl QueryGraph {
    pub fn create_edge(
        &mut self,
        from: &Arc<JoinRelationSet>,
        to: &Arc<JoinRelationSet>,
        filter: Option<Expr>,
    ) {
        let entry = self.edges.entry(from.relations().to_vec()).or_default();
        if let Some(info) = entry
            .iter_mut()
            .find(|info| info.neighbor.as_ref() == to.as_ref())
        {
            if let Some(filter) = filter {
                info.filters.push(filter);
            }
            return;
        }
        entry.push(EdgeInfo {
            neighbor: Arc::clone(to),
            filters: filter.into_iter().collect(),
        });
    }

    /// Edges from `from` whose neighbor is covered by `to`.
    pub fn get_connections(
        &self,
        from: &JoinRelationSet,
        to: &JoinRelationSet,
    ) -> Vec<&EdgeInfo> {
        self.edges
            .get(from.relations())
            .map(|infos| {
                infos
                    .iter()
                    .filter(|info| info.neighbor.is_subset_of(to))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl fmt::Display for QueryGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.edges.keys().collect();
        keys.sort();
        for key in keys {
            let set = JoinRelationSet::new(key.clone());
            for info in &self.edges[key] {
                writeln!(
                    f,
                    "{set} -> {} ({} filters)",
                    info.neighbor,
                    info.filters.len()
                )?;
            }
        }
        Ok(())
    }
}

/// Best known join tree for one relation set.
#[derive(Debug, Clone, Default)]
pub struct JoinNode {
    pub set: Option<Arc<JoinRelationSet>>,
    pub cardinality: f64,
}

/// Memo of best join nodes keyed by relation-set contents.
#[derive(Debug, Default)]
pub struct PlanMap {
    plans: FxHashMap<Vec<u64>, JoinNode>,
}

impl PlanMap {
    pub fn set(&mut self, set: &JoinRelationSet, node: JoinNode) {
        self.plans.insert(set.relations().to_vec(), node);
    }

    pub fn get(&self, set: &JoinRelationSet) -> Option<&JoinNode> {
        self.plans.get(set.relations())
    }
}

/// Table-level connectivity graph used for debugging join shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphNode {
    pub index: u64,
    pub db: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct Graph {
    edges: FxHashMap<GraphNode, Vec<GraphNode>>,
}

impl Graph {
    pub fn add_edge(&mut self, from: GraphNode, to: GraphNode) {
        self.edges.entry(from).or_default().push(to);
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<_> = self.edges.keys().collect();
        nodes.sort_by_key(|n| n.index);
        for node in nodes {
            for to in &self.edges[node] {
                writeln!(
                    f,
                    "{}.{}({}) -> {}.{}({})",
                    node.db, node.name, node.index, to.db, to.name, to.index
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_renders_edges() {
        let mut g = Graph::default();
        let t1 = GraphNode {
            index: 1,
            db: "db1".into(),
            name: "t1".into(),
        };
        let t2 = GraphNode {
            index: 2,
            db: "db1".into(),
            name: "t2".into(),
        };
        let t3 = GraphNode {
            index: 3,
            db: "db1".into(),
            name: "t3".into(),
        };
        g.add_edge(t1.clone(), t2.clone());
        g.add_edge(t1.clone(), t3.clone());
        g.add_edge(t2, t3);
        let rendered = g.to_string();
        assert!(rendered.contains("db1.t1(1) -> db1.t2(2)"));
        assert!(rendered.contains("db1.t2(2) -> db1.t3(3)"));
    }

    #[test]
    fn set_manager_interns_equal_sets() {
        let mut m = JoinRelationSetManager::default();
        let a = m.get_relation(&[1, 2, 3, 4, 5, 6, 7]);
        let b = m.get_relation(&[4, 3, 2, 1]);
        let c = m.get_relation(&[1, 2, 3, 4]);
        assert_eq!(m.len(), 2);
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(a.relations(), &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn query_graph_connections_are_directed() {
        let mut m = JoinRelationSetManager::default();
        let jset1 = m.get_relation(&[1, 2, 3, 4, 5, 6, 7]);
        let jset2 = m.get_relation(&[1, 2, 3, 4]);
        let jset3 = m.get_relation(&[3, 4, 5]);
        let jset4 = m.get_relation(&[9, 8]);

        let mut g = QueryGraph::default();
        g.create_edge(&jset1, &jset2, None);
        g.create_edge(&jset1, &jset3, None);
        g.create_edge(&jset4, &jset1, None);

        let check = |a: &JoinRelationSet, b: &JoinRelationSet, has: bool| {
            let conns = g.get_connections(a, b);
            assert_eq!(!conns.is_empty(), has, "connection {a} -> {b}");
        };
        check(&jset4, &jset1, true);
        check(&jset1, &jset4, false);
        check(&jset1, &jset2, true);
        check(&jset2, &jset1, false);
        check(&jset1, &jset3, true);
        check(&jset3, &jset1, false);
        check(&jset2, &jset3, false);
        check(&jset3, &jset2, false);
        check(&jset3, &jset4, false);
        check(&jset4, &jset3, false);
        check(&jset4, &jset2, false);
        check(&jset2, &jset4, false);
    }

    #[test]
    fn plan_map_keys_by_set_contents() {
        let mut pm = PlanMap::default();
        let s1 = JoinRelationSet::new(vec![1, 2, 3]);
        let s2 = JoinRelationSet::new(vec![3, 2, 1]);
        pm.set(&s1, JoinNode::default());
        assert!(pm.get(&s1).is_some());
        assert!(pm.get(&s2).is_some());
    }
}
