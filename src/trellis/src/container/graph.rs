use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::binding::Binding;
use crate::container::error::{
    render_chain, CircularDependencySnafu, ProviderMissingSnafu, ResolveError, SyncSupplierSnafu,
    UnsafeSupplier,
};
use crate::identifier::Identifier;
use crate::module::BindingMap;
use crate::scope::Scope;

/// The dependency graph of the distinct bindings of a container.
pub(crate) struct Graph {
    nodes: Vec<Arc<Binding>>,
    edges: Vec<Vec<Edge>>,
    indices: HashMap<usize, usize>,
    asynchronous: Vec<bool>,
}

struct Edge {
    id: Identifier,
    target: Option<usize>,
}

impl Edge {
    /// Late bindings and suppliers opening their own request are resolved
    /// after the dependent exists, so a cycle through them is harmless.
    fn breaks_cycle(&self) -> bool {
        match self.id.supplier_mode() {
            Some(mode) => !mode.propagate_scope,
            None => self.id.is_late_binding(),
        }
    }

    /// Edges along which the target has to be available when the dependent
    /// is constructed, either right away or once its late bindings settle.
    fn is_eager(&self) -> bool {
        self.id.supplier_mode().is_none()
    }
}

impl Graph {
    pub fn new(bindings: &BindingMap) -> Self {
        let nodes: Vec<Arc<Binding>> = bindings.bindings().cloned().collect();
        let indices: HashMap<usize, usize> = nodes
            .iter()
            .enumerate()
            .map(|(index, binding)| (address_of(binding), index))
            .collect();

        let edges: Vec<Vec<Edge>> = nodes
            .iter()
            .map(|binding| {
                binding
                    .dependency_ids()
                    .iter()
                    .map(|id| Edge {
                        id: id.clone(),
                        target: bindings
                            .get(&id.output_id())
                            .and_then(|target| indices.get(&address_of(target)).copied()),
                    })
                    .collect()
            })
            .collect();
        let asynchronous = asynchronous_nodes(&nodes, &edges);

        Self {
            nodes,
            edges,
            indices,
            asynchronous,
        }
    }

    pub fn index_of(&self, binding: &Arc<Binding>) -> Option<usize> {
        self.indices.get(&address_of(binding)).copied()
    }

    /// True if constructing `binding` runs an asynchronous provider, its own
    /// or one it waits on through value and late-binding edges.
    pub fn needs_async(&self, binding: &Arc<Binding>) -> bool {
        self.index_of(binding)
            .map_or(binding.is_async(), |index| self.asynchronous[index])
    }

    /// Checks that the graph can be resolved: every dependency is provided,
    /// every cycle goes through a late binding or a non-propagating supplier,
    /// and no synchronous supplier hides asynchronous work.
    pub fn validate(&self) -> Result<(), ResolveError> {
        let mut missing: Vec<Identifier> = Vec::new();
        for edge in self.edges.iter().flatten() {
            let id = edge.id.output_id();
            if edge.target.is_none() && !missing.contains(&id) {
                missing.push(id);
            }
        }
        if !missing.is_empty() {
            return ProviderMissingSnafu { ids: missing }.fail();
        }

        let chains = self.cycles();
        if !chains.is_empty() {
            return CircularDependencySnafu { chains }.fail();
        }

        let suppliers = self.unsafe_suppliers();
        if !suppliers.is_empty() {
            return SyncSupplierSnafu { suppliers }.fail();
        }
        Ok(())
    }

    fn strong_edges(&self, node: usize) -> impl Iterator<Item = (usize, &Identifier)> {
        self.edges[node]
            .iter()
            .filter(|edge| !edge.breaks_cycle())
            .filter_map(|edge| edge.target.map(|target| (target, &edge.id)))
    }

    /// Every shortest cycle over the edges that do not break cycles, each
    /// rendered with the dependency identifiers along it.
    fn cycles(&self) -> Vec<Vec<Identifier>> {
        let mut seen: HashSet<Vec<usize>> = HashSet::new();
        let mut chains: Vec<(String, Vec<Identifier>)> = Vec::new();

        for component in self.strongly_connected_components() {
            let members: HashSet<usize> = component.iter().copied().collect();
            let has_self_loop = component.len() == 1
                && self
                    .strong_edges(component[0])
                    .any(|(target, _)| target == component[0]);
            if component.len() == 1 && !has_self_loop {
                continue;
            }

            for &start in &component {
                let Some(cycle) = self.shortest_cycle(start, &members) else {
                    continue;
                };
                let mut nodes: Vec<usize> = cycle.iter().map(|(node, _)| *node).collect();
                nodes.sort_unstable();
                if !seen.insert(nodes) {
                    continue;
                }

                let labels: Vec<Identifier> = cycle.into_iter().map(|(_, id)| id).collect();
                chains.push(canonical_rotation(labels));
            }
        }

        chains.sort_by(|(a, _), (b, _)| a.cmp(b));
        chains.dedup_by(|(a, _), (b, _)| a == b);
        chains.into_iter().map(|(_, chain)| chain).collect()
    }

    /// Returns the nodes of the shortest cycle through `start`, each paired
    /// with the identifier of the edge leading into it.
    fn shortest_cycle(
        &self,
        start: usize,
        members: &HashSet<usize>,
    ) -> Option<Vec<(usize, Identifier)>> {
        let mut previous: HashMap<usize, (usize, &Identifier)> = HashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            for (target, id) in self.strong_edges(node) {
                if !members.contains(&target) {
                    continue;
                }
                if target == start {
                    let mut cycle = vec![(start, id.clone())];
                    let mut current = node;
                    let mut tail = Vec::new();
                    while current != start {
                        let (from, via) = previous[&current];
                        tail.push((current, via.clone()));
                        current = from;
                    }
                    cycle.extend(tail.into_iter().rev());
                    return Some(cycle);
                }
                if !previous.contains_key(&target) {
                    previous.insert(target, (node, id));
                    queue.push_back(target);
                }
            }
        }
        None
    }

    fn strongly_connected_components(&self) -> Vec<Vec<usize>> {
        let mut tarjan = Tarjan {
            graph: self,
            index_counter: 0,
            stack: Vec::new(),
            on_stack: vec![false; self.nodes.len()],
            indices: vec![None; self.nodes.len()],
            lowlinks: vec![0; self.nodes.len()],
            components: Vec::new(),
        };
        for node in 0..self.nodes.len() {
            if tarjan.indices[node].is_none() {
                tarjan.strong_connect(node);
            }
        }
        tarjan.components
    }

    fn unsafe_suppliers(&self) -> Vec<UnsafeSupplier> {
        let mut memo: HashMap<(usize, bool), bool> = HashMap::new();
        let mut suppliers = Vec::new();

        for (node, edges) in self.edges.iter().enumerate() {
            for edge in edges {
                let (Some(mode), Some(target)) = (edge.id.supplier_mode(), edge.target) else {
                    continue;
                };
                let propagate = mode.propagate_scope;
                if mode.sync
                    && *memo
                        .entry((target, propagate))
                        .or_insert_with(|| self.requires_async(target, propagate))
                {
                    suppliers.push(UnsafeSupplier {
                        output_id: self.nodes[node].output_id().clone(),
                        supplier_id: edge.id.clone(),
                    });
                }
            }
        }
        suppliers
    }

    /// True if resolving `start` may have to wait for an asynchronous
    /// provider. Optimistic singletons are resolved before any request, and
    /// optimistic request bindings before a propagated supplier is called,
    /// so the search does not go through them.
    fn requires_async(&self, start: usize, propagate: bool) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        visited[start] = true;

        while let Some(node) = stack.pop() {
            let binding = &self.nodes[node];
            match binding.scope() {
                Scope::OptimisticSingleton => continue,
                Scope::OptimisticRequest if propagate => continue,
                _ => {}
            }
            if binding.is_async() {
                return true;
            }
            for target in self.edges[node]
                .iter()
                .filter(|edge| edge.is_eager())
                .filter_map(|edge| edge.target)
            {
                if !visited[target] {
                    visited[target] = true;
                    stack.push(target);
                }
            }
        }
        false
    }

    /// Optimistic request bindings reachable from `root` without crossing a
    /// non-propagating supplier, deepest dependencies first.
    pub fn eager_request_bindings(&self, root: usize) -> Vec<Arc<Binding>> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        self.collect_eager(root, &mut visited, &mut order);
        order
    }

    fn collect_eager(&self, node: usize, visited: &mut [bool], order: &mut Vec<Arc<Binding>>) {
        if visited[node] {
            return;
        }
        visited[node] = true;

        for edge in &self.edges[node] {
            let shares_request = edge
                .id
                .supplier_mode()
                .map_or(true, |mode| mode.propagate_scope);
            if let (true, Some(target)) = (shares_request, edge.target) {
                self.collect_eager(target, visited, order);
            }
        }

        if self.nodes[node].scope() == Scope::OptimisticRequest {
            order.push(Arc::clone(&self.nodes[node]));
        }
    }

    /// Marks every binding `from` waits on while it is constructed, through
    /// value and late-binding edges.
    pub fn reachable_from(&self, from: usize) -> Vec<bool> {
        let mut reached = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        reached[from] = true;
        while let Some(node) = stack.pop() {
            for target in self.edges[node]
                .iter()
                .filter(|edge| edge.is_eager())
                .filter_map(|edge| edge.target)
            {
                if !reached[target] {
                    reached[target] = true;
                    stack.push(target);
                }
            }
        }
        reached
    }

    /// Optimistic singletons in insertion order.
    pub fn optimistic_singletons(&self) -> impl Iterator<Item = &Arc<Binding>> {
        self.nodes
            .iter()
            .filter(|binding| binding.scope() == Scope::OptimisticSingleton)
    }
}

struct Tarjan<'a> {
    graph: &'a Graph,
    index_counter: usize,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    indices: Vec<Option<usize>>,
    lowlinks: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl Tarjan<'_> {
    fn strong_connect(&mut self, node: usize) {
        self.indices[node] = Some(self.index_counter);
        self.lowlinks[node] = self.index_counter;
        self.index_counter += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let targets: Vec<usize> = self.graph.strong_edges(node).map(|(t, _)| t).collect();
        for target in targets {
            match self.indices[target] {
                None => {
                    self.strong_connect(target);
                    self.lowlinks[node] = self.lowlinks[node].min(self.lowlinks[target]);
                }
                Some(index) if self.on_stack[target] => {
                    self.lowlinks[node] = self.lowlinks[node].min(index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlinks[node]) == self.indices[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            component.reverse();
            self.components.push(component);
        }
    }
}

/// Marks the bindings with an asynchronous provider and everything waiting
/// on them, walking eager edges backwards.
fn asynchronous_nodes(nodes: &[Arc<Binding>], edges: &[Vec<Edge>]) -> Vec<bool> {
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (node, node_edges) in edges.iter().enumerate() {
        for target in node_edges
            .iter()
            .filter(|edge| edge.is_eager())
            .filter_map(|edge| edge.target)
        {
            dependents[target].push(node);
        }
    }

    let mut asynchronous: Vec<bool> = nodes.iter().map(|binding| binding.is_async()).collect();
    let mut stack: Vec<usize> = (0..nodes.len()).filter(|&node| asynchronous[node]).collect();
    while let Some(node) = stack.pop() {
        for &dependent in &dependents[node] {
            if !asynchronous[dependent] {
                asynchronous[dependent] = true;
                stack.push(dependent);
            }
        }
    }
    asynchronous
}

fn address_of(binding: &Arc<Binding>) -> usize {
    Arc::as_ptr(binding) as usize
}

/// Rotates a cycle so that its rendering is the smallest among all
/// rotations, which makes the reported chain independent of where the
/// search started.
fn canonical_rotation(labels: Vec<Identifier>) -> (String, Vec<Identifier>) {
    (0..labels.len())
        .map(|shift| {
            let mut rotated = labels.clone();
            rotated.rotate_left(shift);
            (render_chain(&rotated), rotated)
        })
        .min_by(|(a, _), (b, _)| a.cmp(b))
        .unwrap_or_else(|| (String::new(), labels))
}
