//! Dependency Graph: derives readiness, blocking, and ordering from a
//! plan's jobs and their resolved dependency back-pointers.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;
use tracing::debug;

use crate::domain::{Job, JobStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle detected: {0:?}")]
    Cycle(Vec<String>),
    #[error("job '{0}' depends on unknown job '{1}'")]
    UnresolvedDependency(String, String),
}

/// A read-only view over a plan's jobs, used to answer dependency-graph
/// queries. Built once per scheduling decision from the current state of
/// `Plan::jobs`.
pub struct DependencyGraph<'a> {
    jobs: &'a HashMap<String, Job>,
    /// filename -> filenames that depend on it
    dependents: HashMap<String, Vec<String>>,
}

impl<'a> DependencyGraph<'a> {
    /// Build a graph view, validating that every dependency reference
    /// resolves to a known job and that the graph is acyclic.
    pub fn build(jobs: &'a HashMap<String, Job>) -> Result<Self, GraphError> {
        debug!(job_count = jobs.len(), "DependencyGraph::build: called");
        for job in jobs.values() {
            for dep in &job.resolved_dependencies {
                if !jobs.contains_key(dep) {
                    return Err(GraphError::UnresolvedDependency(job.filename.clone(), dep.clone()));
                }
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for job in jobs.values() {
            for dep in &job.resolved_dependencies {
                dependents.entry(dep.clone()).or_default().push(job.filename.clone());
            }
        }

        let graph = Self { jobs, dependents };
        graph.detect_cycle()?;
        Ok(graph)
    }

    fn detect_cycle(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: HashMap<&str, Mark> =
            self.jobs.keys().map(|k| (k.as_str(), Mark::Unvisited)).collect();
        let mut stack: Vec<String> = Vec::new();

        fn visit<'a>(
            node: &'a str,
            jobs: &'a HashMap<String, Job>,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<String>,
        ) -> Result<(), GraphError> {
            match marks.get(node).copied() {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    let mut cycle = stack.clone();
                    cycle.push(node.to_string());
                    return Err(GraphError::Cycle(cycle));
                }
                _ => {}
            }
            marks.insert(node, Mark::InProgress);
            stack.push(node.to_string());
            if let Some(job) = jobs.get(node) {
                for dep in &job.resolved_dependencies {
                    visit(dep, jobs, marks, stack)?;
                }
            }
            stack.pop();
            marks.insert(node, Mark::Done);
            Ok(())
        }

        for key in self.jobs.keys() {
            if marks.get(key.as_str()).copied() != Some(Mark::Done) {
                visit(key, self.jobs, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    /// Whether every dependency of `job` is in a status that satisfies
    /// readiness (`Completed` or `Abandoned`).
    pub fn dependencies_satisfied(&self, job: &Job) -> bool {
        job.resolved_dependencies.iter().all(|dep| match self.jobs.get(dep) {
            Some(d) if d.status == JobStatus::Abandoned => {
                crate::loader::warn_on_abandoned_unblock(&job.filename, &d.filename);
                true
            }
            Some(d) => d.status.satisfies_dependency(),
            None => false,
        })
    }

    /// Jobs whose own status is auto-runnable and whose dependencies are
    /// all satisfied, in deterministic order (order-prefix, falling back
    /// to lexicographic filename).
    pub fn runnable(&self) -> Vec<&'a Job> {
        let mut result: Vec<&Job> = self
            .jobs
            .values()
            .filter(|j| j.is_auto_runnable() && self.dependencies_satisfied(j))
            .collect();
        result.sort_by(|a, b| order_key(&a.filename).cmp(&order_key(&b.filename)));
        debug!(count = result.len(), "DependencyGraph::runnable: computed");
        result
    }

    /// Jobs that are not runnable and not terminal, together with the
    /// specific dependency filenames still blocking each one.
    pub fn unmet(&self) -> Vec<(&'a Job, Vec<&'a str>)> {
        self.jobs
            .values()
            .filter(|j| !j.is_terminal() && !(j.is_auto_runnable() && self.dependencies_satisfied(j)))
            .map(|j| {
                let blockers: Vec<&str> = j
                    .resolved_dependencies
                    .iter()
                    .filter(|dep| {
                        self.jobs.get(dep.as_str()).map(|d| !d.status.satisfies_dependency()).unwrap_or(true)
                    })
                    .map(|s| s.as_str())
                    .collect();
                (j, blockers)
            })
            .filter(|(_, blockers)| !blockers.is_empty())
            .collect()
    }

    /// Jobs with no dependencies at all.
    pub fn roots(&self) -> Vec<&'a Job> {
        let mut roots: Vec<&Job> = self.jobs.values().filter(|j| j.resolved_dependencies.is_empty()).collect();
        roots.sort_by(|a, b| order_key(&a.filename).cmp(&order_key(&b.filename)));
        roots
    }

    /// Jobs that directly depend on `filename`.
    pub fn dependents(&self, filename: &str) -> Vec<&'a Job> {
        let mut deps: Vec<&Job> = self
            .dependents
            .get(filename)
            .into_iter()
            .flatten()
            .filter_map(|f| self.jobs.get(f))
            .collect();
        deps.sort_by(|a, b| order_key(&a.filename).cmp(&order_key(&b.filename)));
        deps
    }

    /// A full topological ordering of every job in the plan, tie-broken by
    /// order-prefix then lexicographic filename among jobs with equal
    /// in-degree at each step (Kahn's algorithm).
    pub fn topological_order(&self) -> Vec<&'a Job> {
        let mut in_degree: HashMap<&str, usize> =
            self.jobs.keys().map(|k| (k.as_str(), 0)).collect();
        for job in self.jobs.values() {
            *in_degree.get_mut(job.filename.as_str()).unwrap() = job.resolved_dependencies.len();
        }

        let mut ready: Vec<&str> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(k, _)| *k).collect();
        ready.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
        let mut queue: VecDeque<&str> = ready.into_iter().collect();

        let mut visited: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(self.jobs.len());

        while let Some(node) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            if let Some(job) = self.jobs.get(node) {
                order.push(job);
            }
            let mut newly_ready = Vec::new();
            for dependent in self.dependents.get(node).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(dependent.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        newly_ready.push(dependent.as_str());
                    }
                }
            }
            newly_ready.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
            for n in newly_ready {
                queue.push_back(n);
            }
        }

        order
    }
}

/// The sort key used for deterministic ordering: `(numeric order prefix if
/// present, full filename)` so that `010-a.md` sorts before `020-b.md`,
/// and filenames with no numeric prefix fall back to plain lexicographic
/// order among themselves.
fn order_key(filename: &str) -> (Option<u64>, &str) {
    let prefix_digits: String = filename.chars().take_while(|c| c.is_ascii_digit()).collect();
    let prefix = if prefix_digits.is_empty() { None } else { prefix_digits.parse::<u64>().ok() };
    (prefix, filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{JobFlags, JobType, OutputSpec};

    fn job(filename: &str, deps: &[&str], status: JobStatus) -> Job {
        Job {
            id: None,
            title: None,
            job_type: JobType::Shell,
            status,
            model: None,
            worktree: None,
            rules_file: None,
            note_ref: None,
            include_files: vec![],
            source_files: vec![],
            output: OutputSpec::default(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            flags: JobFlags::default(),
            error: None,
            session_id: None,
            output_file: None,
            commit_sha: None,
            started_at: None,
            completed_at: None,
            pid: None,
            process_started_at: None,
            session_name: None,
            body: String::new(),
            filename: filename.into(),
            resolved_dependencies: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn map(jobs: Vec<Job>) -> HashMap<String, Job> {
        jobs.into_iter().map(|j| (j.filename.clone(), j)).collect()
    }

    #[test]
    fn linear_chain_runnable_only_first() {
        let jobs = map(vec![
            job("010-a.md", &[], JobStatus::Pending),
            job("020-b.md", &["010-a.md"], JobStatus::Pending),
            job("030-c.md", &["020-b.md"], JobStatus::Pending),
        ]);
        let graph = DependencyGraph::build(&jobs).unwrap();
        let runnable = graph.runnable();
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].filename, "010-a.md");
    }

    #[test]
    fn diamond_dependency_unblocks_after_both_branches_complete() {
        let jobs = map(vec![
            job("010-a.md", &[], JobStatus::Completed),
            job("020-b.md", &["010-a.md"], JobStatus::Completed),
            job("030-c.md", &["010-a.md"], JobStatus::Pending),
            job("040-d.md", &["020-b.md", "030-c.md"], JobStatus::Pending),
        ]);
        let graph = DependencyGraph::build(&jobs).unwrap();
        let runnable: Vec<&str> = graph.runnable().iter().map(|j| j.filename.as_str()).collect();
        assert_eq!(runnable, vec!["030-c.md"]);

        let mut jobs2 = jobs.clone();
        jobs2.get_mut("030-c.md").unwrap().status = JobStatus::Completed;
        let graph2 = DependencyGraph::build(&jobs2).unwrap();
        let runnable2: Vec<&str> = graph2.runnable().iter().map(|j| j.filename.as_str()).collect();
        assert_eq!(runnable2, vec!["040-d.md"]);
    }

    #[test]
    fn cycle_detection() {
        let jobs = map(vec![
            job("010-a.md", &["020-b.md"], JobStatus::Pending),
            job("020-b.md", &["010-a.md"], JobStatus::Pending),
        ]);
        let err = DependencyGraph::build(&jobs).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn unresolved_dependency_errors() {
        let jobs = map(vec![job("010-a.md", &["missing.md"], JobStatus::Pending)]);
        let err = DependencyGraph::build(&jobs).unwrap_err();
        assert!(matches!(err, GraphError::UnresolvedDependency(_, _)));
    }

    #[test]
    fn abandoned_dependency_satisfies_readiness() {
        let jobs = map(vec![
            job("010-a.md", &[], JobStatus::Abandoned),
            job("020-b.md", &["010-a.md"], JobStatus::Pending),
        ]);
        let graph = DependencyGraph::build(&jobs).unwrap();
        let runnable: Vec<&str> = graph.runnable().iter().map(|j| j.filename.as_str()).collect();
        assert_eq!(runnable, vec!["020-b.md"]);
    }

    #[test]
    fn unmet_reports_blocking_filenames() {
        let jobs = map(vec![
            job("010-a.md", &[], JobStatus::Pending),
            job("020-b.md", &["010-a.md"], JobStatus::Pending),
        ]);
        let graph = DependencyGraph::build(&jobs).unwrap();
        let unmet = graph.unmet();
        assert_eq!(unmet.len(), 1);
        assert_eq!(unmet[0].0.filename, "020-b.md");
        assert_eq!(unmet[0].1, vec!["010-a.md"]);
    }

    #[test]
    fn topological_order_respects_edges_and_tie_break() {
        let jobs = map(vec![
            job("020-b.md", &[], JobStatus::Pending),
            job("010-a.md", &[], JobStatus::Pending),
            job("030-c.md", &["010-a.md", "020-b.md"], JobStatus::Pending),
        ]);
        let graph = DependencyGraph::build(&jobs).unwrap();
        let order: Vec<&str> = graph.topological_order().iter().map(|j| j.filename.as_str()).collect();
        assert_eq!(order, vec!["010-a.md", "020-b.md", "030-c.md"]);
    }

    #[test]
    fn roots_and_dependents() {
        let jobs = map(vec![
            job("010-a.md", &[], JobStatus::Pending),
            job("020-b.md", &["010-a.md"], JobStatus::Pending),
            job("030-c.md", &["010-a.md"], JobStatus::Pending),
        ]);
        let graph = DependencyGraph::build(&jobs).unwrap();
        let roots: Vec<&str> = graph.roots().iter().map(|j| j.filename.as_str()).collect();
        assert_eq!(roots, vec!["010-a.md"]);
        let dependents: Vec<&str> = graph.dependents("010-a.md").iter().map(|j| j.filename.as_str()).collect();
        assert_eq!(dependents, vec!["020-b.md", "030-c.md"]);
    }
}
