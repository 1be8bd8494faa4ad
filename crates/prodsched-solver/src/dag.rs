//! Dependency graph construction and validation.
//!
//! Weaves quality inspections and rework into the base precedence table,
//! producing the *effective DAG* the scheduler actually walks. See
//! `build_effective_dag` for the four transformations, applied in order.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use prodsched_core::{Bundle, DependencyRelation, ProductName, TaskId};

/// Errors during graph construction. Kept as a manually implemented
/// `Display`/`Error` pair rather than `thiserror`, matching the low-level
/// style of this crate's other error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A cycle was found in the effective DAG; `path` lists the cycle,
    /// starting and ending on the same task id.
    CycleDetected { path: Vec<TaskId> },
    /// An edge references a task id that does not exist in the bundle.
    DanglingReference { referenced_by: TaskId, missing: TaskId },
    /// Two distinct primaries were assigned the same synthesized quality id.
    QualityIdCollision { quality_id: TaskId },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::CycleDetected { path } => {
                write!(f, "cycle detected: {:?}", path)
            }
            GraphError::DanglingReference { referenced_by, missing } => {
                write!(f, "edge touching task {referenced_by} references unknown task {missing}")
            }
            GraphError::QualityIdCollision { quality_id } => {
                write!(f, "synthesized quality id {quality_id} collides with an existing id")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// A non-fatal observation from `validate_dag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphWarning {
    UnreachableFromRoot(TaskId),
    OrphanTask { task: TaskId, kind: &'static str },
}

/// Where an effective edge came from, for diagnostics and display naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSource {
    Base,
    LatePart,
    Rework,
    Quality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveEdge {
    pub from: TaskId,
    pub to: TaskId,
    pub relation: DependencyRelation,
    pub source: EdgeSource,
}

/// The fully synthesized dependency graph, ready for priority/CPM analysis
/// and scheduling.
#[derive(Debug, Clone)]
pub struct EffectiveDag {
    pub edges: Vec<EffectiveEdge>,
    pub successors: BTreeMap<TaskId, Vec<EffectiveEdge>>,
    pub predecessors: BTreeMap<TaskId, Vec<EffectiveEdge>>,
    pub topo_order: Vec<TaskId>,
    /// task -> its quality inspection id, covering both explicit
    /// `QualityLink`s and synthesized rework quality ids.
    pub quality_of: BTreeMap<TaskId, TaskId>,
    /// quality id -> the task it inspects (inverse of `quality_of`).
    pub primary_of_quality: BTreeMap<TaskId, TaskId>,
    pub task_to_product: BTreeMap<TaskId, ProductName>,
    pub late_part_products: BTreeMap<TaskId, ProductName>,
}

impl EffectiveDag {
    pub fn successors_of(&self, task: TaskId) -> &[EffectiveEdge] {
        self.successors.get(&task).map_or(&[], Vec::as_slice)
    }

    pub fn predecessors_of(&self, task: TaskId) -> &[EffectiveEdge] {
        self.predecessors.get(&task).map_or(&[], Vec::as_slice)
    }

    pub fn out_degree(&self, task: TaskId) -> usize {
        self.successors_of(task).len()
    }
}

/// Duration, in minutes, for every node in the effective DAG: real tasks
/// plus every synthesized or explicit quality inspection.
pub fn duration_table(bundle: &Bundle, dag: &EffectiveDag) -> BTreeMap<TaskId, i64> {
    let mut table: BTreeMap<TaskId, i64> =
        bundle.tasks.iter().map(|t| (t.id, t.duration_minutes)).collect();

    for link in &bundle.quality_links {
        table.insert(link.quality, link.duration_minutes);
    }
    let rework_specs: BTreeMap<TaskId, i64> = bundle
        .reworks
        .iter()
        .map(|r| (r.rework, r.quality_duration_minutes))
        .collect();
    for (&rework, &quality) in &dag.quality_of {
        if let Some(&duration) = rework_specs.get(&rework) {
            table.insert(quality, duration);
        }
    }
    table
}

/// Worker headcount required for every node in the effective DAG, mirroring
/// `duration_table`.
pub fn workers_table(bundle: &Bundle, dag: &EffectiveDag) -> BTreeMap<TaskId, u32> {
    let mut table: BTreeMap<TaskId, u32> =
        bundle.tasks.iter().map(|t| (t.id, t.workers_required)).collect();

    for link in &bundle.quality_links {
        table.insert(link.quality, link.workers_required);
    }
    let rework_specs: BTreeMap<TaskId, u32> = bundle
        .reworks
        .iter()
        .map(|r| (r.rework, r.quality_workers_required))
        .collect();
    for (&rework, &quality) in &dag.quality_of {
        if let Some(&workers) = rework_specs.get(&rework) {
            table.insert(quality, workers);
        }
    }
    table
}

/// Build the product-containment map: each task maps to the first product
/// (in name order, for determinism) whose task-id range contains it.
fn containment_map(bundle: &Bundle) -> BTreeMap<TaskId, ProductName> {
    let mut products: Vec<&prodsched_core::Product> = bundle.products.iter().collect();
    products.sort_by(|a, b| a.name.cmp(&b.name));

    let mut map = BTreeMap::new();
    for product in products {
        for &task_id in &product.task_ids {
            map.entry(task_id).or_insert_with(|| product.name.clone());
        }
    }
    map
}

/// Resolve `TaskToProduct`: explicit product-line hints on late-part/rework
/// edges win over containment-derived associations.
fn resolve_task_to_product(bundle: &Bundle) -> BTreeMap<TaskId, ProductName> {
    let mut map = containment_map(bundle);

    for late_part in &bundle.late_parts {
        if let Some(product) = &late_part.product_line {
            map.insert(late_part.task, product.clone());
            map.insert(late_part.dependent, product.clone());
        }
    }
    for rework in &bundle.reworks {
        if let Some(product) = &rework.product_line {
            map.insert(rework.rework, product.clone());
            map.insert(rework.dependent, product.clone());
        }
    }

    map
}

/// Resolve the product line a task belongs to at priority/scheduling time:
/// explicit mapping, else (for quality tasks) the primary's product, else
/// `None`.
pub fn resolve_product_line(
    task: TaskId,
    primary_of_quality: &BTreeMap<TaskId, TaskId>,
    task_to_product: &BTreeMap<TaskId, ProductName>,
) -> Option<ProductName> {
    if let Some(product) = task_to_product.get(&task) {
        return Some(product.clone());
    }
    if let Some(&primary) = primary_of_quality.get(&task) {
        return task_to_product.get(&primary).cloned();
    }
    None
}

/// Synthesize a quality id for every rework task, drawn from a namespace
/// disjoint from every existing task id and every explicit quality id, and
/// assert injectivity.
fn synthesize_rework_quality_ids(bundle: &Bundle) -> Result<BTreeMap<TaskId, TaskId>, GraphError> {
    let mut used_ids: HashSet<TaskId> = bundle.tasks.iter().map(|t| t.id).collect();
    for link in &bundle.quality_links {
        used_ids.insert(link.quality);
    }
    let max_existing = used_ids.iter().copied().max().unwrap_or(0);

    let rework_ids: BTreeSet<TaskId> = bundle.reworks.iter().map(|r| r.rework).collect();
    let mut next_id = max_existing + 1;
    let mut synthesized = BTreeMap::new();

    for rework_id in rework_ids.iter().copied() {
        while used_ids.contains(&next_id) {
            next_id += 1;
        }
        if !used_ids.insert(next_id) {
            return Err(GraphError::QualityIdCollision { quality_id: next_id });
        }
        synthesized.insert(rework_id, next_id);
        next_id += 1;
    }

    Ok(synthesized)
}

/// Apply quality interposition to a single outgoing edge: if `from` has a
/// quality task, route through it (emitting the `from -> quality` edge at
/// most once), otherwise pass the edge through unchanged.
fn emit_with_interposition(
    from: TaskId,
    to: TaskId,
    relation: DependencyRelation,
    source: EdgeSource,
    quality_of: &BTreeMap<TaskId, TaskId>,
    emitted_quality_edges: &mut HashSet<(TaskId, TaskId)>,
    edges: &mut Vec<EffectiveEdge>,
) {
    if let Some(&quality) = quality_of.get(&from) {
        if emitted_quality_edges.insert((from, quality)) {
            edges.push(EffectiveEdge {
                from,
                to: quality,
                relation: DependencyRelation::FinishEqualsStart,
                source: EdgeSource::Quality,
            });
        }
        edges.push(EffectiveEdge { from: quality, to, relation, source });
    } else {
        edges.push(EffectiveEdge { from, to, relation, source });
    }
}

/// Build the effective DAG from a bundle's raw tables. This is the dynamic
/// dependency graph builder (§4.2): quality interposition on base edges,
/// verbatim late-part edges, rework-with-quality edges, then residual
/// quality edges for any primary whose quality was never interposed above.
pub fn build_effective_dag(bundle: &Bundle) -> Result<EffectiveDag, GraphError> {
    let task_ids: BTreeSet<TaskId> = bundle.tasks.iter().map(|t| t.id).collect();
    let rework_quality = synthesize_rework_quality_ids(bundle)?;

    let mut quality_of: BTreeMap<TaskId, TaskId> = bundle
        .quality_links
        .iter()
        .map(|l| (l.primary, l.quality))
        .collect();
    for (&rework, &quality) in &rework_quality {
        quality_of.insert(rework, quality);
    }

    let mut primary_of_quality: BTreeMap<TaskId, TaskId> = BTreeMap::new();
    for (&primary, &quality) in &quality_of {
        primary_of_quality.insert(quality, primary);
    }

    let mut edges = Vec::new();
    let mut emitted_quality_edges: HashSet<(TaskId, TaskId)> = HashSet::new();

    // 1. Quality interposition on base edges.
    for edge in &bundle.precedence {
        emit_with_interposition(
            edge.first,
            edge.second,
            edge.relation,
            EdgeSource::Base,
            &quality_of,
            &mut emitted_quality_edges,
            &mut edges,
        );
    }

    // 2. Late-part edges, verbatim.
    let mut late_part_products = BTreeMap::new();
    for late_part in &bundle.late_parts {
        edges.push(EffectiveEdge {
            from: late_part.task,
            to: late_part.dependent,
            relation: DependencyRelation::FinishBeforeStart,
            source: EdgeSource::LatePart,
        });
        if let Some(product) = &late_part.product_line {
            late_part_products.insert(late_part.task, product.clone());
        }
    }

    // 3. Rework edges with quality (always present, via synthesis above).
    for rework in &bundle.reworks {
        let relation = rework.relation.unwrap_or(DependencyRelation::FinishBeforeStart);
        emit_with_interposition(
            rework.rework,
            rework.dependent,
            relation,
            EdgeSource::Rework,
            &quality_of,
            &mut emitted_quality_edges,
            &mut edges,
        );
    }

    // 4. Residual quality edges for primaries never interposed above.
    for (&primary, &quality) in &quality_of {
        if emitted_quality_edges.insert((primary, quality)) {
            edges.push(EffectiveEdge {
                from: primary,
                to: quality,
                relation: DependencyRelation::FinishEqualsStart,
                source: EdgeSource::Quality,
            });
        }
    }

    // Dangling reference check: every edge endpoint must be a known task,
    // a known quality id, or a known rework-synthesized quality id.
    let known_ids: BTreeSet<TaskId> = task_ids
        .iter()
        .copied()
        .chain(quality_of.values().copied())
        .collect();
    for edge in &edges {
        if !known_ids.contains(&edge.from) {
            return Err(GraphError::DanglingReference { referenced_by: edge.to, missing: edge.from });
        }
        if !known_ids.contains(&edge.to) {
            return Err(GraphError::DanglingReference { referenced_by: edge.from, missing: edge.to });
        }
    }

    let mut successors: BTreeMap<TaskId, Vec<EffectiveEdge>> = BTreeMap::new();
    let mut predecessors: BTreeMap<TaskId, Vec<EffectiveEdge>> = BTreeMap::new();
    for &edge in &edges {
        successors.entry(edge.from).or_default().push(edge);
        predecessors.entry(edge.to).or_default().push(edge);
    }

    let mut all_nodes: BTreeSet<TaskId> = known_ids;
    for edge in &edges {
        all_nodes.insert(edge.from);
        all_nodes.insert(edge.to);
    }

    let topo_order = topological_sort(&all_nodes, &successors, &predecessors)?;

    let task_to_product = resolve_task_to_product(bundle);

    Ok(EffectiveDag {
        edges,
        successors,
        predecessors,
        topo_order,
        quality_of,
        primary_of_quality,
        task_to_product,
        late_part_products,
    })
}

/// Kahn's algorithm. Deterministic: ties among zero-in-degree nodes are
/// broken by ascending task id.
fn topological_sort(
    nodes: &BTreeSet<TaskId>,
    successors: &BTreeMap<TaskId, Vec<EffectiveEdge>>,
    predecessors: &BTreeMap<TaskId, Vec<EffectiveEdge>>,
) -> Result<Vec<TaskId>, GraphError> {
    let mut in_degree: BTreeMap<TaskId, usize> = nodes
        .iter()
        .map(|&n| (n, predecessors.get(&n).map_or(0, Vec::len)))
        .collect();

    let mut ready_sorted: Vec<TaskId> = in_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&n, _)| n)
        .collect();
    ready_sorted.sort_unstable();
    let mut ready: VecDeque<TaskId> = ready_sorted.into();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node) = ready.pop_front() {
        order.push(node);
        let mut newly_ready = Vec::new();
        for edge in successors.get(&node).map_or(&[][..], Vec::as_slice) {
            let degree = in_degree.get_mut(&edge.to).expect("successor is a known node");
            *degree -= 1;
            if *degree == 0 {
                newly_ready.push(edge.to);
            }
        }
        newly_ready.sort_unstable();
        for n in newly_ready {
            ready.push_back(n);
        }
    }

    if order.len() != nodes.len() {
        let path = find_cycle(nodes, successors);
        return Err(GraphError::CycleDetected { path });
    }

    Ok(order)
}

/// DFS-based cycle detection with path reporting, used once Kahn's
/// algorithm reports leftover nodes.
fn find_cycle(nodes: &BTreeSet<TaskId>, successors: &BTreeMap<TaskId, Vec<EffectiveEdge>>) -> Vec<TaskId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: BTreeMap<TaskId, Mark> = BTreeMap::new();
    let mut stack: Vec<TaskId> = Vec::new();

    fn visit(
        node: TaskId,
        successors: &BTreeMap<TaskId, Vec<EffectiveEdge>>,
        marks: &mut BTreeMap<TaskId, Mark>,
        stack: &mut Vec<TaskId>,
    ) -> Option<Vec<TaskId>> {
        if let Some(Mark::Visiting) = marks.get(&node) {
            let start = stack.iter().position(|&n| n == node).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if marks.get(&node) == Some(&Mark::Done) {
            return None;
        }
        marks.insert(node, Mark::Visiting);
        stack.push(node);
        for edge in successors.get(&node).map_or(&[][..], Vec::as_slice) {
            if let Some(cycle) = visit(edge.to, successors, marks, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    for &node in nodes {
        if !marks.contains_key(&node) {
            if let Some(cycle) = visit(node, successors, &mut marks, &mut stack) {
                return cycle;
            }
        }
    }
    Vec::new()
}

/// Validation pass: the hard error (cycle already surfaced by construction;
/// this also re-confirms it) plus warnings that do not abort the run.
pub fn validate_dag(dag: &EffectiveDag, bundle: &Bundle) -> Vec<GraphWarning> {
    let mut warnings = Vec::new();

    let has_incoming: BTreeSet<TaskId> = dag.predecessors.keys().copied().collect();
    let all_nodes: BTreeSet<TaskId> = dag
        .successors
        .keys()
        .chain(dag.predecessors.keys())
        .copied()
        .collect();
    let roots: Vec<TaskId> = all_nodes
        .iter()
        .copied()
        .filter(|n| !has_incoming.contains(n))
        .collect();

    let mut reachable: BTreeSet<TaskId> = BTreeSet::new();
    let mut queue: VecDeque<TaskId> = roots.into_iter().collect();
    while let Some(node) = queue.pop_front() {
        if reachable.insert(node) {
            for edge in dag.successors_of(node) {
                queue.push_back(edge.to);
            }
        }
    }

    for &node in &all_nodes {
        if !reachable.contains(&node) {
            warnings.push(GraphWarning::UnreachableFromRoot(node));
        }
    }

    let in_any_product: BTreeSet<TaskId> = bundle
        .products
        .iter()
        .flat_map(|p| p.task_ids.iter().copied())
        .collect();
    for late_part in &bundle.late_parts {
        if !in_any_product.contains(&late_part.task) && !dag.task_to_product.contains_key(&late_part.task) {
            warnings.push(GraphWarning::OrphanTask { task: late_part.task, kind: "late-part" });
        }
    }
    for rework in &bundle.reworks {
        if !in_any_product.contains(&rework.rework) && !dag.task_to_product.contains_key(&rework.rework) {
            warnings.push(GraphWarning::OrphanTask { task: rework.rework, kind: "rework" });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use prodsched_core::{PrecedenceEdge, Product, QualityLink, ReworkEdge, Task, TaskKind};

    fn product(name: &str, range: std::ops::RangeInclusive<TaskId>) -> Product {
        Product::new(name, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
            .task_range(*range.start(), *range.end())
    }

    #[test]
    fn base_edge_without_quality_passes_through() {
        let bundle = Bundle {
            tasks: vec![Task::new(1), Task::new(2)],
            precedence: vec![PrecedenceEdge {
                first: 1,
                second: 2,
                relation: DependencyRelation::FinishBeforeStart,
            }],
            products: vec![product("P", 1..=2)],
            ..Default::default()
        };
        let dag = build_effective_dag(&bundle).unwrap();
        assert_eq!(dag.edges.len(), 1);
        assert_eq!(dag.edges[0].from, 1);
        assert_eq!(dag.edges[0].to, 2);
    }

    #[test]
    fn quality_interposition_splits_base_edge() {
        let bundle = Bundle {
            tasks: vec![Task::new(1), Task::new(2), Task::new(100).kind(TaskKind::QualityInspection)],
            quality_links: vec![QualityLink { primary: 1, quality: 100, duration_minutes: 30, workers_required: 1 }],
            precedence: vec![PrecedenceEdge {
                first: 1,
                second: 2,
                relation: DependencyRelation::FinishBeforeStart,
            }],
            products: vec![product("P", 1..=2)],
            ..Default::default()
        };
        let dag = build_effective_dag(&bundle).unwrap();
        assert_eq!(dag.edges.len(), 2);
        assert!(dag.edges.iter().any(|e| e.from == 1 && e.to == 100
            && e.relation == DependencyRelation::FinishEqualsStart));
        assert!(dag.edges.iter().any(|e| e.from == 100 && e.to == 2
            && e.relation == DependencyRelation::FinishBeforeStart));
    }

    #[test]
    fn residual_quality_edge_emitted_when_primary_has_no_outgoing_base_edge() {
        let bundle = Bundle {
            tasks: vec![Task::new(1), Task::new(100).kind(TaskKind::QualityInspection)],
            quality_links: vec![QualityLink { primary: 1, quality: 100, duration_minutes: 30, workers_required: 1 }],
            products: vec![product("P", 1..=1)],
            ..Default::default()
        };
        let dag = build_effective_dag(&bundle).unwrap();
        assert_eq!(dag.edges.len(), 1);
        assert_eq!(dag.edges[0].from, 1);
        assert_eq!(dag.edges[0].to, 100);
    }

    #[test]
    fn rework_quality_id_is_synthesized_above_existing_ids() {
        let bundle = Bundle {
            tasks: vec![Task::new(1), Task::new(2), Task::new(50).kind(TaskKind::Rework)],
            reworks: vec![ReworkEdge {
                rework: 50,
                dependent: 2,
                relation: None,
                product_line: None,
                quality_duration_minutes: 30,
                quality_workers_required: 1,
            }],
            products: vec![product("P", 1..=2)],
            ..Default::default()
        };
        let dag = build_effective_dag(&bundle).unwrap();
        let quality_id = *dag.quality_of.get(&50).unwrap();
        assert!(quality_id > 50);
        assert!(dag.edges.iter().any(|e| e.from == 50 && e.to == quality_id));
        assert!(dag.edges.iter().any(|e| e.from == quality_id && e.to == 2));
    }

    #[test]
    fn cycle_is_detected() {
        let bundle = Bundle {
            tasks: vec![Task::new(1), Task::new(2)],
            precedence: vec![
                PrecedenceEdge { first: 1, second: 2, relation: DependencyRelation::FinishBeforeStart },
                PrecedenceEdge { first: 2, second: 1, relation: DependencyRelation::FinishBeforeStart },
            ],
            products: vec![product("P", 1..=2)],
            ..Default::default()
        };
        let err = build_effective_dag(&bundle).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn topo_order_respects_dependencies() {
        let bundle = Bundle {
            tasks: vec![Task::new(1), Task::new(2), Task::new(3)],
            precedence: vec![
                PrecedenceEdge { first: 1, second: 2, relation: DependencyRelation::FinishBeforeStart },
                PrecedenceEdge { first: 2, second: 3, relation: DependencyRelation::FinishBeforeStart },
            ],
            products: vec![product("P", 1..=3)],
            ..Default::default()
        };
        let dag = build_effective_dag(&bundle).unwrap();
        let pos = |id: TaskId| dag.topo_order.iter().position(|&n| n == id).unwrap();
        assert!(pos(1) < pos(2));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn builder_is_idempotent() {
        let bundle = Bundle {
            tasks: vec![Task::new(1), Task::new(2)],
            precedence: vec![PrecedenceEdge {
                first: 1,
                second: 2,
                relation: DependencyRelation::FinishBeforeStart,
            }],
            products: vec![product("P", 1..=2)],
            ..Default::default()
        };
        let first = build_effective_dag(&bundle).unwrap();
        let second = build_effective_dag(&bundle).unwrap();
        let mut a: Vec<_> = first.edges.iter().map(|e| (e.from, e.to, e.relation)).collect();
        let mut b: Vec<_> = second.edges.iter().map(|e| (e.from, e.to, e.relation)).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn validate_warns_on_orphan_late_part() {
        let bundle = Bundle {
            tasks: vec![Task::new(1), Task::new(300).kind(TaskKind::LatePart)],
            late_parts: vec![prodsched_core::LatePartInfo {
                task: 300,
                dependent: 1,
                on_dock: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
                product_line: None,
            }],
            products: vec![product("P", 1..=1)],
            ..Default::default()
        };
        let dag = build_effective_dag(&bundle).unwrap();
        let warnings = validate_dag(&dag, &bundle);
        assert!(warnings.contains(&GraphWarning::OrphanTask { task: 300, kind: "late-part" }));
    }
}
