use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::hooks::{catalog, HookRegistry};

/// A named one-off task: a shell command run in a job container of `service`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub service: String,
    pub command: String,
}

impl JobDefinition {
    pub fn new(
        name: impl Into<String>,
        service: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            command: command.into(),
        }
    }
}

pub fn builtin() -> Vec<JobDefinition> {
    vec![
        JobDefinition::new("lms-migrate", "lms", "./manage.py lms migrate"),
        JobDefinition::new("cms-migrate", "cms", "./manage.py cms migrate"),
        JobDefinition::new(
            "lms-compute-grades",
            "lms",
            "./manage.py lms compute_grades -v1 --all_courses",
        ),
        JobDefinition::new(
            "cms-backfill-blocks",
            "cms",
            "./manage.py cms backfill_course_outlines",
        ),
    ]
}

/// Built-in jobs folded through `jobs:definitions`.
pub fn definitions(hooks: &HookRegistry) -> Result<Vec<JobDefinition>> {
    hooks.apply(&catalog::JOB_DEFINITIONS, builtin(), &())
}

/// One definition per name, sorted by name. Where names repeat, the last
/// definition wins, matching what [`resolve`] runs.
pub fn effective(hooks: &HookRegistry) -> Result<Vec<JobDefinition>> {
    let mut by_name: BTreeMap<String, JobDefinition> = BTreeMap::new();
    for job in definitions(hooks)? {
        by_name.insert(job.name.clone(), job);
    }
    Ok(by_name.into_values().collect())
}

/// Look `name` up in the catalog. Later definitions shadow earlier ones, so a
/// plugin can replace a built-in job.
pub fn resolve(hooks: &HookRegistry, name: &str) -> Result<JobDefinition> {
    let jobs = definitions(hooks)?;
    if let Some(job) = jobs.iter().rev().find(|j| j.name == name) {
        return Ok(job.clone());
    }
    let mut available: Vec<String> = jobs.into_iter().map(|j| j.name).collect();
    available.sort();
    available.dedup();
    Err(Error::job_not_found(name, available))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::priority;

    #[test]
    fn plugin_definition_shadows_builtin() {
        let hooks = HookRegistry::new();
        catalog::declare_all(&hooks).unwrap();
        hooks
            .add_filter(&catalog::JOB_DEFINITIONS, priority::DEFAULT, |_, mut jobs, _| {
                jobs.push(JobDefinition::new("lms-migrate", "lms", "echo replaced"));
                Ok(jobs)
            })
            .unwrap();

        let job = resolve(&hooks, "lms-migrate").unwrap();
        assert_eq!(job.command, "echo replaced");

        let listed = effective(&hooks).unwrap();
        let shadowed: Vec<&JobDefinition> = listed.iter().filter(|j| j.name == "lms-migrate").collect();
        assert_eq!(shadowed, vec![&job]);
        let names: Vec<&str> = listed.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["cms-backfill-blocks", "cms-migrate", "lms-compute-grades", "lms-migrate"]
        );
    }

    #[test]
    fn unknown_job_lists_available() {
        let hooks = HookRegistry::new();
        catalog::declare_all(&hooks).unwrap();
        let err = resolve(&hooks, "nope").unwrap_err();
        assert_eq!(err.code.as_str(), "job.not_found");
        let available = err.details["available"].as_array().unwrap();
        assert!(available.iter().any(|j| j == "cms-backfill-blocks"));
    }
}
