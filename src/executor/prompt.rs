//! Prompt resolution: assembles the text a backend actually receives from
//! a job's rules file, its dependencies' output (when
//! `prepend_dependencies` applies), its include files, and its body, in
//! that order.

use std::path::Path;

use tracing::debug;

use crate::domain::{Job, Plan};

/// Build the full prompt text for `job` within `plan`.
///
/// Order: rules file contents, then (if `prepend_dependencies` resolves to
/// true for this job) each completed dependency's body and recorded
/// output back-to-back in dependency order, then each include file's
/// contents, then the job's own body.
///
/// Missing include/rules files are reported inline as a bracketed
/// `[missing: path]` marker rather than failing the whole job — a
/// dangling reference shouldn't block execution of an otherwise-runnable
/// job, but it also shouldn't pass silently.
///
/// `prepend_override` is the CLI `--prepend-dependencies` value, if any;
/// when set it outranks both the job's own flag and the plan's default
/// (CLI > job field > plan default), the same precedence `Executor` uses
/// for `model`.
pub fn resolve(plan: &Plan, job: &Job, prepend_override: Option<bool>) -> String {
    debug!(job = %job.filename, "prompt::resolve: called");
    let mut sections: Vec<String> = Vec::new();

    if let Some(rules_file) = &job.rules_file {
        sections.push(banner(rules_file, &read_or_marker(&plan.dir, rules_file)));
    }

    let prepend_dependencies = prepend_override
        .unwrap_or_else(|| job.effective_prepend_dependencies(plan.config.prepend_dependencies));
    if prepend_dependencies {
        for dep_filename in &job.resolved_dependencies {
            if let Some(dep) = plan.jobs.get(dep_filename) {
                let mut dep_section = format!("--- dependency: {} ---\n{}", dep.filename, dep.body.trim_end());
                if let Some(output_file) = &dep.output_file {
                    dep_section.push('\n');
                    dep_section.push_str(&banner(output_file, &read_or_marker(&plan.dir, output_file)));
                }
                sections.push(dep_section);
            }
        }
    }

    for include in &job.include_files {
        sections.push(banner(include, &read_or_marker(&plan.dir, include)));
    }

    sections.push(job.body.clone());

    sections.join("\n\n")
}

/// Wrap inlined file content with a visible delimiter banner identifying
/// its source path, so a reader of the assembled prompt can tell where
/// each section came from.
fn banner(source_path: &str, contents: &str) -> String {
    format!("--- {source_path} ---\n{contents}")
}

fn read_or_marker(plan_dir: &Path, relative: &str) -> String {
    let path = plan_dir.join(relative);
    match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => format!("[missing: {relative}]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{JobFlags, JobType, OutputSpec};
    use crate::domain::{JobStatus, PlanConfig};
    use tempfile::tempdir;

    fn job(filename: &str) -> Job {
        Job {
            id: None,
            title: None,
            job_type: JobType::Oneshot,
            status: JobStatus::Pending,
            model: None,
            worktree: None,
            rules_file: None,
            note_ref: None,
            include_files: vec![],
            source_files: vec![],
            output: OutputSpec::default(),
            depends_on: vec![],
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
            body: "do the thing".into(),
            filename: filename.into(),
            resolved_dependencies: vec![],
        }
    }

    #[test]
    fn resolves_body_only_when_nothing_else_set() {
        let dir = tempdir().unwrap();
        let plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let j = job("010-a.md");
        assert_eq!(resolve(&plan, &j, None), "do the thing");
    }

    #[test]
    fn includes_rules_file_first_with_source_banner() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("RULES.md"), "follow these rules").unwrap();
        let plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let mut j = job("010-a.md");
        j.rules_file = Some("RULES.md".into());
        let resolved = resolve(&plan, &j, None);
        assert!(resolved.starts_with("--- RULES.md ---\nfollow these rules"));
        assert!(resolved.ends_with("do the thing"));
    }

    #[test]
    fn prepends_completed_dependency_bodies_when_enabled() {
        let dir = tempdir().unwrap();
        let mut config = PlanConfig::default();
        config.prepend_dependencies = true;
        let mut plan = Plan::new(dir.path().to_path_buf(), config);
        let mut dep = job("010-a.md");
        dep.body = "dependency content".into();
        dep.status = JobStatus::Completed;
        plan.jobs.insert(dep.filename.clone(), dep);

        let mut j = job("020-b.md");
        j.resolved_dependencies = vec!["010-a.md".into()];
        let resolved = resolve(&plan, &j, None);
        assert!(resolved.contains("dependency content"));
        assert!(resolved.contains("do the thing"));
    }

    #[test]
    fn prepend_override_outranks_job_flag_and_plan_default() {
        let dir = tempdir().unwrap();
        let mut config = PlanConfig::default();
        config.prepend_dependencies = false;
        let mut plan = Plan::new(dir.path().to_path_buf(), config);
        let mut dep = job("010-a.md");
        dep.body = "dependency content".into();
        dep.status = JobStatus::Completed;
        plan.jobs.insert(dep.filename.clone(), dep);

        let mut j = job("020-b.md");
        j.resolved_dependencies = vec!["010-a.md".into()];
        j.flags.prepend_dependencies = Some(false);

        // plan default and job flag both say false...
        assert!(!resolve(&plan, &j, None).contains("dependency content"));
        // ...but an explicit CLI override of true still wins.
        assert!(resolve(&plan, &j, Some(true)).contains("dependency content"));
    }

    #[test]
    fn missing_include_file_is_marked_not_fatal() {
        let dir = tempdir().unwrap();
        let plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let mut j = job("010-a.md");
        j.include_files = vec!["does-not-exist.md".into()];
        let resolved = resolve(&plan, &j, None);
        assert!(resolved.contains("--- does-not-exist.md ---\n[missing: does-not-exist.md]"));
    }

    #[test]
    fn include_file_contents_are_wrapped_with_source_banner() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "background context").unwrap();
        let plan = Plan::new(dir.path().to_path_buf(), PlanConfig::default());
        let mut j = job("010-a.md");
        j.include_files = vec!["notes.md".into()];
        let resolved = resolve(&plan, &j, None);
        assert!(resolved.contains("--- notes.md ---\nbackground context"));
    }
}
