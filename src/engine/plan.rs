//! Run plan construction: reference resolution and topological ordering.
//!
//! A [`RunPlan`] is built once per invocation from a declared resource list.
//! All relationships (`require`, `before`, `subscribe`, `notify`, fragment
//! `target`) are resolved into index edges here, so the engine never deals
//! with free-form references.  Ordering uses Kahn's algorithm with a min-heap
//! keyed on declaration index, which gives a stable tie-break.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{CycleError, PlanError};

use super::spec::{ResourceId, ResourceKind, ResourceSpec};

/// One snippet of a concat file, resolved at plan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Identifier of the fragment resource.
    pub id: ResourceId,
    /// Sort key; fragments are concatenated in ascending key order.
    pub order: String,
    /// Literal content, if given.
    pub content: Option<String>,
    /// Path (or `file://` URL) to read the content from, if given.
    pub source: Option<String>,
}

/// A resource with its relationships resolved to plan indices.
#[derive(Debug, Clone)]
pub struct PlannedResource {
    /// The declared spec.
    pub spec: ResourceSpec,
    /// Position in the original declaration list.
    pub declared_at: usize,
    /// Indices (into [`RunPlan::resources`]) that must converge first.
    pub depends_on: Vec<usize>,
    /// Indices whose change triggers a refresh of this resource.
    pub watches: Vec<usize>,
    /// For concat resources: fragments sorted by order key.
    pub fragments: Vec<Fragment>,
}

impl PlannedResource {
    /// Identifier of the underlying spec.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.spec.id()
    }
}

/// An ordered, fully resolved set of resources.
#[derive(Debug, Clone)]
pub struct RunPlan {
    resources: Vec<PlannedResource>,
    order: Vec<usize>,
}

impl RunPlan {
    /// Resolve references and order `specs` topologically.
    ///
    /// # Errors
    ///
    /// - [`PlanError::DuplicateResource`] when two specs share an identifier
    /// - [`PlanError::UnknownDependency`] for references to undeclared resources
    /// - [`PlanError::UnknownFragmentTarget`] for fragments without a concat
    /// - [`PlanError::Cycle`] when the dependency graph is not acyclic
    pub fn build(specs: Vec<ResourceSpec>) -> Result<Self, PlanError> {
        let mut index: HashMap<ResourceId, usize> = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.id(), i).is_some() {
                return Err(PlanError::DuplicateResource(spec.id()));
            }
        }

        let lookup = |owner: &ResourceSpec, dep: &ResourceId| {
            index
                .get(dep)
                .copied()
                .ok_or_else(|| PlanError::UnknownDependency {
                    resource: owner.id(),
                    dependency: dep.clone(),
                })
        };

        let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
        let mut watches: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.require {
                add_edge(&mut depends_on, i, lookup(spec, dep)?);
            }
            for later in &spec.before {
                add_edge(&mut depends_on, lookup(spec, later)?, i);
            }
            for watched in &spec.subscribe {
                let w = lookup(spec, watched)?;
                add_edge(&mut depends_on, i, w);
                add_edge(&mut watches, i, w);
            }
            for watcher in &spec.notify {
                let w = lookup(spec, watcher)?;
                add_edge(&mut depends_on, w, i);
                add_edge(&mut watches, w, i);
            }
        }

        let mut fragments: Vec<Vec<Fragment>> = vec![Vec::new(); specs.len()];
        for (i, spec) in specs.iter().enumerate() {
            if spec.kind != ResourceKind::Fragment {
                continue;
            }
            let target = spec.attributes.get_str("target").unwrap_or_default();
            let concat = index
                .get(&ResourceId::new(ResourceKind::Concat, target.clone()))
                .copied()
                .ok_or_else(|| PlanError::UnknownFragmentTarget {
                    fragment: spec.id(),
                    target,
                })?;
            add_edge(&mut depends_on, concat, i);
            if let Some(list) = fragments.get_mut(concat) {
                list.push(Fragment {
                    id: spec.id(),
                    order: spec.attributes.get_str("order").unwrap_or_default(),
                    content: spec.attributes.get_str("content"),
                    source: spec.attributes.get_str("source"),
                });
            }
        }
        for list in &mut fragments {
            // Stable: equal keys keep declaration order.
            list.sort_by(|a, b| a.order.cmp(&b.order));
        }

        let order = topological_order(&depends_on).map_err(|members| {
            CycleError {
                path: members
                    .into_iter()
                    .filter_map(|i| specs.get(i).map(ResourceSpec::id))
                    .collect(),
            }
        })?;

        let resources = specs
            .into_iter()
            .zip(depends_on)
            .zip(watches)
            .zip(fragments)
            .enumerate()
            .map(
                |(declared_at, (((spec, depends_on), watches), fragments))| PlannedResource {
                    spec,
                    declared_at,
                    depends_on,
                    watches,
                    fragments,
                },
            )
            .collect();

        Ok(Self { resources, order })
    }

    /// Resources in declaration order.
    #[must_use]
    pub fn resources(&self) -> &[PlannedResource] {
        &self.resources
    }

    /// Resources in execution order.
    pub fn ordered(&self) -> impl Iterator<Item = &PlannedResource> {
        self.order.iter().filter_map(|&i| self.resources.get(i))
    }

    /// Number of planned resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the plan contains no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

fn add_edge(edges: &mut [Vec<usize>], node: usize, dep: usize) {
    if let Some(list) = edges.get_mut(node)
        && !list.contains(&dep)
    {
        list.push(dep);
    }
}

/// Kahn's algorithm with a min-heap for declaration-order tie-breaks.
///
/// On failure returns the indices of one cycle.
fn topological_order(depends_on: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = depends_on.len();
    let mut in_degree: Vec<usize> = depends_on.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (node, deps) in depends_on.iter().enumerate() {
        for &dep in deps {
            if let Some(list) = dependents.get_mut(dep) {
                list.push(node);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(n);

    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &next in dependents.get(node).map_or(&[][..], Vec::as_slice) {
            if let Some(count) = in_degree.get_mut(next) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err(find_cycle(depends_on, &in_degree))
    }
}

/// Walk dependency edges among unprocessed nodes until a node repeats.
///
/// Every node left with a non-zero in-degree has at least one unprocessed
/// dependency, so the walk cannot dead-end.
fn find_cycle(depends_on: &[Vec<usize>], in_degree: &[usize]) -> Vec<usize> {
    let stuck = |i: usize| in_degree.get(i).is_some_and(|&d| d > 0);
    let Some(start) = (0..depends_on.len()).find(|&i| stuck(i)) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut node = start;
    loop {
        if let Some(&at) = position.get(&node) {
            // Reversed so the cycle reads dependency-first.
            let mut cycle = path.split_off(at);
            cycle.reverse();
            return cycle;
        }
        position.insert(node, path.len());
        path.push(node);
        match depends_on
            .get(node)
            .and_then(|deps| deps.iter().copied().find(|&d| stuck(d)))
        {
            Some(next) => node = next,
            None => return path,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::engine::spec::Guard;

    fn exec(name: &str) -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Exec, name)
    }

    fn id(name: &str) -> ResourceId {
        ResourceId::new(ResourceKind::Exec, name)
    }

    fn names(plan: &RunPlan) -> Vec<String> {
        plan.ordered().map(|r| r.spec.name.clone()).collect()
    }

    #[test]
    fn independent_resources_keep_declaration_order() {
        let plan = RunPlan::build(vec![exec("c"), exec("a"), exec("b")]).unwrap();
        assert_eq!(names(&plan), ["c", "a", "b"]);
    }

    #[test]
    fn require_moves_dependency_first() {
        let plan = RunPlan::build(vec![exec("app").requires(id("lib")), exec("lib")]).unwrap();
        assert_eq!(names(&plan), ["lib", "app"]);
    }

    #[test]
    fn before_is_reverse_require() {
        let plan = RunPlan::build(vec![exec("setup"), exec("user").before(id("setup"))]).unwrap();
        assert_eq!(names(&plan), ["user", "setup"]);
    }

    #[test]
    fn notify_creates_watch_edge_on_target() {
        let plan = RunPlan::build(vec![
            exec("compile").guarded(Guard::RefreshOnly),
            exec("rc").notifies(id("compile")),
        ])
        .unwrap();
        assert_eq!(names(&plan), ["rc", "compile"]);
        let compile = &plan.resources()[0];
        assert_eq!(compile.watches, vec![1]);
        assert_eq!(compile.depends_on, vec![1]);
    }

    #[test]
    fn diamond_respects_all_edges() {
        let plan = RunPlan::build(vec![
            exec("d").requires(id("b")).requires(id("c")),
            exec("c").requires(id("a")),
            exec("b").requires(id("a")),
            exec("a"),
        ])
        .unwrap();
        assert_eq!(names(&plan), ["a", "c", "b", "d"]);
    }

    #[test]
    fn cycle_is_reported_with_members() {
        let err = RunPlan::build(vec![
            exec("free"),
            exec("a").requires(id("b")),
            exec("b").requires(id("a")),
        ])
        .unwrap_err();
        let PlanError::Cycle(cycle) = err else {
            panic!("expected cycle, got {err:?}");
        };
        let mut members: Vec<String> = cycle.path.iter().map(|i| i.name.clone()).collect();
        members.sort();
        assert_eq!(members, ["a", "b"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = RunPlan::build(vec![exec("a").requires(id("a"))]).unwrap_err();
        assert!(matches!(err, PlanError::Cycle(_)));
    }

    #[test]
    fn duplicate_resource_rejected() {
        let err = RunPlan::build(vec![exec("a"), exec("a")]).unwrap_err();
        assert_eq!(err, PlanError::DuplicateResource(id("a")));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let err = RunPlan::build(vec![exec("a").requires(id("ghost"))]).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnknownDependency {
                resource: id("a"),
                dependency: id("ghost"),
            }
        );
    }

    #[test]
    fn fragments_sorted_by_order_key_and_ordered_before_concat() {
        let frag = |name: &str, order: &str| {
            ResourceSpec::new(ResourceKind::Fragment, name)
                .with("target", "/out.sh")
                .with("order", order)
                .with("content", name)
        };
        let plan = RunPlan::build(vec![
            ResourceSpec::new(ResourceKind::Concat, "/out.sh"),
            frag("twenty", "20"),
            frag("zero", "00"),
            frag("ten", "10"),
        ])
        .unwrap();

        let concat = &plan.resources()[0];
        let orders: Vec<&str> = concat.fragments.iter().map(|f| f.order.as_str()).collect();
        assert_eq!(orders, ["00", "10", "20"]);
        assert_eq!(names(&plan).last().map(String::as_str), Some("/out.sh"));
    }

    #[test]
    fn orphan_fragment_rejected() {
        let err = RunPlan::build(vec![
            ResourceSpec::new(ResourceKind::Fragment, "lost").with("target", "/nowhere"),
        ])
        .unwrap_err();
        assert!(matches!(err, PlanError::UnknownFragmentTarget { .. }));
    }
}
