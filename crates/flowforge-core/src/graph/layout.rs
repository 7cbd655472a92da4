//! Layered auto-layout with a branch-order repair pass.
//!
//! Pass 1 ([`place`]) is a Sugiyama-style pipeline:
//!
//! 1. Longest-path ranking along the primary axis.
//! 2. Virtual nodes split edges spanning more than one rank.
//! 3. A breadth-first initial order seeded by the edge list, with `true`
//!    before `false` and `loopComplete` before `loopBody` per source.
//! 4. Barycenter sweeps, keeping the ordering with the fewest crossings.
//! 5. Orthogonal coordinates that follow neighbours while keeping each
//!    rank's order and minimum separation.
//!
//! Pass 2 ([`repair`]) enforces, for every `if_condition`, that the true
//! cluster sits before the false cluster on the orthogonal axis, and for
//! every `loop` that the completion cluster sits before the body cluster.
//! Pass 1 only biases toward that outcome; pass 2 guarantees it.

use std::collections::{HashMap, VecDeque};

use flowforge_types::config::{LayoutConfig, LayoutDirection};
use flowforge_types::graph::{Graph, Handle, Position};
use flowforge_types::node::NodeKind;

use super::dag::topological_order;

/// Coordinate relaxation passes in pass 1.
const COORDINATE_PASSES: usize = 4;

/// Upper bound on repair rounds in pass 2.
const MAX_REPAIR_ROUNDS: usize = 8;

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Position every node: placement followed by branch-order repair.
///
/// Only `position` values change. A graph that is not a DAG is returned
/// unchanged.
pub fn layout(graph: &Graph, config: &LayoutConfig) -> Graph {
    let placed = place(graph, config);
    repair(&placed, config)
}

/// Pass 1: layered placement.
pub fn place(graph: &Graph, config: &LayoutConfig) -> Graph {
    let mut next = graph.clone();
    let Some(structure) = Structure::new(graph) else {
        return next;
    };
    let axes = Axes::new(config);

    let mut layered = Layered::build(&structure);
    layered.initial_order(structure.len());
    layered.minimize_crossings(config.ordering_sweeps);

    let extents: Vec<f64> = (0..layered.len())
        .map(|v| if layered.is_real(v, structure.len()) { axes.ortho_extent } else { 0.0 })
        .collect();
    let ortho = layered.assign_coordinates(&extents, config.node_sep);

    let centers: Vec<f64> = ortho[..structure.len()].to_vec();
    write_positions(&mut next, &structure, &centers, &axes);

    tracing::debug!(
        nodes = structure.len(),
        ranks = layered.layers.len(),
        virtual_nodes = layered.len() - structure.len(),
        "layout placed"
    );
    next
}

/// Pass 2: shift branch clusters until every ordering constraint holds.
///
/// Reads the current positions and only moves nodes along the orthogonal
/// axis. A layout that already satisfies every constraint is returned
/// unchanged.
pub fn repair(graph: &Graph, config: &LayoutConfig) -> Graph {
    let mut next = graph.clone();
    let Some(structure) = Structure::new(graph) else {
        return next;
    };
    let axes = Axes::new(config);
    let gap = axes.ortho_extent + config.node_sep;

    let mut centers: Vec<f64> = graph
        .nodes
        .iter()
        .map(|n| axes.ortho_of(n.position) + axes.ortho_extent / 2.0)
        .collect();
    let constraints = structure.constraints();

    let mut rounds = 0;
    for _ in 0..MAX_REPAIR_ROUNDS {
        let mut changed = false;
        for c in &constraints {
            if let Some(shift) = c.required_shift(&centers, gap) {
                for &v in &c.upper_only {
                    centers[v] -= shift;
                }
                for &v in &c.lower_only {
                    centers[v] += shift;
                }
                tracing::debug!(
                    node_id = graph.nodes[c.node].id.as_str(),
                    shift,
                    "branch order repaired"
                );
                changed = true;
            }
        }
        if !changed {
            break;
        }
        rounds += 1;
        structure.separate_ranks(&mut centers, gap);
    }

    if rounds > 0 {
        for (node, center) in next.nodes.iter_mut().zip(&centers) {
            axes.set_ortho(&mut node.position, center - axes.ortho_extent / 2.0);
        }
    }
    next
}

/// Ids of `if_condition` / `loop` nodes whose branch order is violated in the
/// current positions.
pub fn branch_order_violations(graph: &Graph, config: &LayoutConfig) -> Vec<String> {
    let Some(structure) = Structure::new(graph) else {
        return Vec::new();
    };
    let axes = Axes::new(config);
    let centers: Vec<f64> = graph
        .nodes
        .iter()
        .map(|n| axes.ortho_of(n.position))
        .collect();
    structure
        .constraints()
        .iter()
        .filter(|c| c.is_violated(&centers))
        .map(|c| graph.nodes[c.node].id.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Axes
// ---------------------------------------------------------------------------

/// Maps the abstract rank/orthogonal axes onto x/y.
struct Axes {
    direction: LayoutDirection,
    ortho_extent: f64,
    rank_step: f64,
}

impl Axes {
    fn new(config: &LayoutConfig) -> Self {
        let (rank_extent, ortho_extent) = match config.direction {
            LayoutDirection::LR => (config.node_width, config.node_height),
            LayoutDirection::TB => (config.node_height, config.node_width),
        };
        Self {
            direction: config.direction,
            ortho_extent,
            rank_step: rank_extent + config.rank_sep,
        }
    }

    fn ortho_of(&self, p: Position) -> f64 {
        match self.direction {
            LayoutDirection::LR => p.y,
            LayoutDirection::TB => p.x,
        }
    }

    fn set_ortho(&self, p: &mut Position, value: f64) {
        match self.direction {
            LayoutDirection::LR => p.y = value,
            LayoutDirection::TB => p.x = value,
        }
    }

    /// Top-left position from a rank and an orthogonal center.
    fn top_left(&self, rank: usize, ortho_center: f64) -> Position {
        let along = rank as f64 * self.rank_step;
        let across = ortho_center - self.ortho_extent / 2.0;
        match self.direction {
            LayoutDirection::LR => Position::new(along, across),
            LayoutDirection::TB => Position::new(across, along),
        }
    }
}

fn write_positions(graph: &mut Graph, structure: &Structure, centers: &[f64], axes: &Axes) {
    let min = centers.iter().copied().fold(f64::INFINITY, f64::min);
    let offset = if min.is_finite() { axes.ortho_extent / 2.0 - min } else { 0.0 };
    for (i, node) in graph.nodes.iter_mut().enumerate() {
        node.position = axes.top_left(structure.rank[i], centers[i] + offset);
    }
}

// ---------------------------------------------------------------------------
// Graph structure (real nodes only)
// ---------------------------------------------------------------------------

/// Index-based view of the graph shared by both passes.
struct Structure {
    kinds: Vec<NodeKind>,
    /// Real edges `(source, target, handle)`, sorted for seeding.
    edges: Vec<(usize, usize, Handle)>,
    succs: Vec<Vec<usize>>,
    topo: Vec<usize>,
    rank: Vec<usize>,
}

impl Structure {
    fn new(graph: &Graph) -> Option<Self> {
        if graph.nodes.is_empty() {
            return None;
        }
        let order = match topological_order(graph) {
            Ok(order) => order,
            Err(err) => {
                tracing::warn!(error = %err, "layout skipped: graph is not a DAG");
                return None;
            }
        };

        let index: HashMap<&str, usize> = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();
        let n = graph.nodes.len();

        let mut edges: Vec<(usize, usize, Handle)> = graph
            .edges
            .iter()
            .filter_map(|e| {
                let s = *index.get(e.source_node_id.as_str())?;
                let t = *index.get(e.target_node_id.as_str())?;
                Some((s, t, e.handle()))
            })
            .collect();
        edges.sort_by_key(|&(s, _, h)| (s, seed_priority(h)));

        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        for &(s, t, _) in &edges {
            succs[s].push(t);
            preds[t].push(s);
        }

        let topo: Vec<usize> = order.into_iter().filter_map(|id| index.get(id).copied()).collect();
        let mut rank = vec![0usize; n];
        for &v in &topo {
            rank[v] = preds[v].iter().map(|&u| rank[u] + 1).max().unwrap_or(0);
        }

        Some(Self {
            kinds: graph.nodes.iter().map(|n| n.kind()).collect(),
            edges,
            succs,
            topo,
            rank,
        })
    }

    fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Nodes reachable from `start` without entering `blocked`.
    fn cluster(&self, start: usize, blocked: usize) -> Vec<bool> {
        let mut seen = vec![false; self.len()];
        let mut queue = VecDeque::from([start]);
        seen[start] = true;
        while let Some(v) = queue.pop_front() {
            for &w in &self.succs[v] {
                if w != blocked && !seen[w] {
                    seen[w] = true;
                    queue.push_back(w);
                }
            }
        }
        seen
    }

    fn target_of(&self, node: usize, handle: Handle) -> Option<usize> {
        self.edges
            .iter()
            .find(|&&(s, _, h)| s == node && h == handle)
            .map(|&(_, t, _)| t)
    }

    /// One constraint per `if_condition` / `loop` with both outputs wired,
    /// in topological order.
    fn constraints(&self) -> Vec<OrderConstraint> {
        self.topo
            .iter()
            .filter_map(|&v| {
                let (upper, lower) = match self.kinds[v] {
                    NodeKind::IfCondition => (Handle::True, Handle::False),
                    NodeKind::Loop => (Handle::LoopComplete, Handle::LoopBody),
                    _ => return None,
                };
                let upper = self.cluster(self.target_of(v, upper)?, v);
                let lower = self.cluster(self.target_of(v, lower)?, v);
                Some(OrderConstraint::new(v, &upper, &lower))
            })
            .collect()
    }

    /// Restore minimum separation within each rank, keeping current order.
    fn separate_ranks(&self, centers: &mut [f64], gap: f64) {
        let max_rank = self.rank.iter().copied().max().unwrap_or(0);
        for r in 0..=max_rank {
            let mut members: Vec<usize> = (0..self.len()).filter(|&v| self.rank[v] == r).collect();
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|&a, &b| centers[a].total_cmp(&centers[b]));
            let desired: Vec<f64> = members.iter().map(|&v| centers[v]).collect();
            let gaps = vec![gap; members.len() - 1];
            for (&v, c) in members.iter().zip(place_in_order(&desired, &gaps)) {
                centers[v] = c;
            }
        }
    }
}

/// Seeding priority: `true` and `loopComplete` before `false` and `loopBody`.
fn seed_priority(handle: Handle) -> u8 {
    match handle {
        Handle::True | Handle::LoopComplete => 0,
        Handle::False | Handle::LoopBody => 1,
        _ => 2,
    }
}

// ---------------------------------------------------------------------------
// Ordering constraints
// ---------------------------------------------------------------------------

/// "Cluster `upper` lies before cluster `lower`" for one branching node.
struct OrderConstraint {
    node: usize,
    upper: Vec<usize>,
    lower: Vec<usize>,
    upper_only: Vec<usize>,
    lower_only: Vec<usize>,
}

impl OrderConstraint {
    fn new(node: usize, upper: &[bool], lower: &[bool]) -> Self {
        let members = |set: &[bool]| -> Vec<usize> {
            set.iter().enumerate().filter(|&(_, &m)| m).map(|(i, _)| i).collect()
        };
        let exclusive = |set: &[bool], other: &[bool]| -> Vec<usize> {
            (0..set.len()).filter(|&i| set[i] && !other[i]).collect()
        };
        Self {
            node,
            upper: members(upper),
            lower: members(lower),
            upper_only: exclusive(upper, lower),
            lower_only: exclusive(lower, upper),
        }
    }

    /// Clusters with no exclusive members cannot be ordered.
    fn is_orderable(&self) -> bool {
        !self.upper_only.is_empty() || !self.lower_only.is_empty()
    }

    fn is_violated(&self, centers: &[f64]) -> bool {
        self.is_orderable() && mean(&self.upper, centers) >= mean(&self.lower, centers)
    }

    /// Shift applied to exclusive members (upper by `-d`, lower by `+d`).
    ///
    /// Shared members stay put, so moving the exclusive parts by `d` changes
    /// the difference of means by `d * (a + b)` where `a` and `b` are the
    /// exclusive fractions of each cluster. `d` is at least the current
    /// difference and large enough to leave one `gap` of clearance.
    fn required_shift(&self, centers: &[f64], gap: f64) -> Option<f64> {
        if !self.is_violated(centers) {
            return None;
        }
        let diff = mean(&self.upper, centers) - mean(&self.lower, centers);
        let a = self.upper_only.len() as f64 / self.upper.len() as f64;
        let b = self.lower_only.len() as f64 / self.lower.len() as f64;
        Some(diff.max((diff + gap) / (a + b)))
    }
}

fn mean(members: &[usize], centers: &[f64]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    members.iter().map(|&v| centers[v]).sum::<f64>() / members.len() as f64
}

// ---------------------------------------------------------------------------
// Layered graph (real + virtual nodes)
// ---------------------------------------------------------------------------

struct Layered {
    rank: Vec<usize>,
    preds: Vec<Vec<usize>>,
    succs: Vec<Vec<usize>>,
    /// Nodes per rank, in current order.
    layers: Vec<Vec<usize>>,
    /// Index of each node within its layer.
    pos: Vec<usize>,
}

impl Layered {
    /// Real nodes keep their indices; virtual nodes follow.
    fn build(structure: &Structure) -> Self {
        let n = structure.len();
        let mut rank = structure.rank.clone();
        let mut preds = vec![Vec::new(); n];
        let mut succs = vec![Vec::new(); n];

        for &(s, t, _) in &structure.edges {
            let mut prev = s;
            for r in structure.rank[s] + 1..structure.rank[t] {
                let v = rank.len();
                rank.push(r);
                preds.push(vec![prev]);
                succs.push(Vec::new());
                succs[prev].push(v);
                prev = v;
            }
            succs[prev].push(t);
            preds[t].push(prev);
        }

        let depth = rank.iter().copied().max().unwrap_or(0) + 1;
        let pos = vec![0; rank.len()];
        Self {
            rank,
            preds,
            succs,
            layers: vec![Vec::new(); depth],
            pos,
        }
    }

    fn len(&self) -> usize {
        self.rank.len()
    }

    fn is_real(&self, v: usize, real_count: usize) -> bool {
        v < real_count
    }

    /// Breadth-first from the sources, in node order, following successors
    /// in seeded edge order.
    fn initial_order(&mut self, real_count: usize) {
        let mut visited = vec![false; self.len()];
        let mut queue: VecDeque<usize> = (0..real_count).filter(|&v| self.preds[v].is_empty()).collect();
        for &v in &queue {
            visited[v] = true;
        }
        while let Some(v) = queue.pop_front() {
            self.layers[self.rank[v]].push(v);
            for &w in &self.succs[v] {
                if !visited[w] {
                    visited[w] = true;
                    queue.push_back(w);
                }
            }
        }
        for v in 0..self.len() {
            if !visited[v] {
                self.layers[self.rank[v]].push(v);
            }
        }
        self.refresh_positions();
    }

    fn refresh_positions(&mut self) {
        for layer in &self.layers {
            for (i, &v) in layer.iter().enumerate() {
                self.pos[v] = i;
            }
        }
    }

    /// Alternate downward and upward barycenter sweeps; keep the best order.
    fn minimize_crossings(&mut self, sweeps: u32) {
        let mut best = self.layers.clone();
        let mut best_crossings = self.crossings();
        if best_crossings == 0 {
            return;
        }
        let depth = self.layers.len();

        for sweep in 0..sweeps {
            if sweep % 2 == 0 {
                for r in 1..depth {
                    self.reorder(r, true);
                }
            } else {
                for r in (0..depth.saturating_sub(1)).rev() {
                    self.reorder(r, false);
                }
            }
            let crossings = self.crossings();
            if crossings < best_crossings {
                best = self.layers.clone();
                best_crossings = crossings;
                if crossings == 0 {
                    break;
                }
            }
        }

        self.layers = best;
        self.refresh_positions();
    }

    /// Stable sort of one layer by the barycenter of its neighbours in the
    /// adjacent layer (`downward` uses predecessors).
    fn reorder(&mut self, r: usize, downward: bool) {
        let mut keyed: Vec<(f64, usize)> = self.layers[r]
            .iter()
            .map(|&v| {
                let neighbours = if downward { &self.preds[v] } else { &self.succs[v] };
                let bc = if neighbours.is_empty() {
                    self.pos[v] as f64
                } else {
                    neighbours.iter().map(|&u| self.pos[u] as f64).sum::<f64>()
                        / neighbours.len() as f64
                };
                (bc, v)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.layers[r] = keyed.into_iter().map(|(_, v)| v).collect();
        for (i, &v) in self.layers[r].iter().enumerate() {
            self.pos[v] = i;
        }
    }

    fn crossings(&self) -> usize {
        let mut pos = vec![0usize; self.len()];
        for layer in &self.layers {
            for (i, &v) in layer.iter().enumerate() {
                pos[v] = i;
            }
        }
        let mut total = 0;
        for layer in &self.layers {
            let segments: Vec<(usize, usize)> = layer
                .iter()
                .flat_map(|&u| self.succs[u].iter().map(move |&w| (u, w)))
                .map(|(u, w)| (pos[u], pos[w]))
                .collect();
            for i in 0..segments.len() {
                for j in i + 1..segments.len() {
                    let (a1, b1) = segments[i];
                    let (a2, b2) = segments[j];
                    if (a1 < a2 && b1 > b2) || (a1 > a2 && b1 < b2) {
                        total += 1;
                    }
                }
            }
        }
        total
    }

    /// Orthogonal centers: stacked per layer, then relaxed toward neighbour
    /// means while preserving order and separation.
    fn assign_coordinates(&self, extents: &[f64], sep: f64) -> Vec<f64> {
        let mut coord = vec![0.0; self.len()];
        for r in 0..self.layers.len() {
            self.settle_layer(r, &mut coord, extents, sep, |v, c| c[v]);
        }

        let depth = self.layers.len();
        for _ in 0..COORDINATE_PASSES {
            for r in 1..depth {
                self.settle_layer(r, &mut coord, extents, sep, |v, c| {
                    neighbour_mean(&self.preds[v], c).unwrap_or(c[v])
                });
            }
            for r in (0..depth.saturating_sub(1)).rev() {
                self.settle_layer(r, &mut coord, extents, sep, |v, c| {
                    neighbour_mean(&self.succs[v], c).unwrap_or(c[v])
                });
            }
        }
        for r in 0..depth {
            self.settle_layer(r, &mut coord, extents, sep, |v, c| {
                let both: Vec<usize> = self.preds[v].iter().chain(&self.succs[v]).copied().collect();
                neighbour_mean(&both, c).unwrap_or(c[v])
            });
        }
        coord
    }

    /// Place layer `r` as close as possible to `desired(v, coords)` subject to
    /// order and separation.
    fn settle_layer(
        &self,
        r: usize,
        coord: &mut [f64],
        extents: &[f64],
        sep: f64,
        desired: impl Fn(usize, &[f64]) -> f64,
    ) {
        let layer = &self.layers[r];
        if layer.is_empty() {
            return;
        }
        let targets: Vec<f64> = layer.iter().map(|&v| desired(v, coord)).collect();
        let gaps: Vec<f64> = layer
            .windows(2)
            .map(|w| (extents[w[0]] + extents[w[1]]) / 2.0 + sep)
            .collect();
        for (&v, c) in layer.iter().zip(place_in_order(&targets, &gaps)) {
            coord[v] = c;
        }
    }
}

fn neighbour_mean(neighbours: &[usize], coord: &[f64]) -> Option<f64> {
    if neighbours.is_empty() {
        return None;
    }
    Some(neighbours.iter().map(|&u| coord[u]).sum::<f64>() / neighbours.len() as f64)
}

/// Least-squares placement of an ordered row.
///
/// Minimizes `sum (y_i - desired_i)^2` subject to
/// `y_{i+1} - y_i >= min_gap[i]`, via pool-adjacent-violators on the
/// gap-adjusted targets.
fn place_in_order(desired: &[f64], min_gap: &[f64]) -> Vec<f64> {
    let n = desired.len();
    let mut offset = vec![0.0; n];
    for i in 1..n {
        offset[i] = offset[i - 1] + min_gap[i - 1];
    }

    let mut blocks: Vec<(f64, usize)> = Vec::with_capacity(n);
    for i in 0..n {
        blocks.push((desired[i] - offset[i], 1));
        while blocks.len() >= 2 {
            let (s2, c2) = blocks[blocks.len() - 1];
            let (s1, c1) = blocks[blocks.len() - 2];
            if s1 / c1 as f64 <= s2 / c2 as f64 {
                break;
            }
            blocks.pop();
            if let Some(last) = blocks.last_mut() {
                *last = (s1 + s2, c1 + c2);
            }
        }
    }

    let mut out = Vec::with_capacity(n);
    for (sum, count) in blocks {
        let value = sum / count as f64;
        out.extend(std::iter::repeat_n(value, count));
    }
    out.iter().zip(offset).map(|(z, o)| z + o).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
