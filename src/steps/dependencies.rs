//! Python modules for the selected interpreter.
use crate::config::{Config, RuntimeSettings};
use crate::error::StepError;
use crate::host::Requirement;
use crate::host::dependency::normalize_name;

use super::{Context, ConvergenceStep, Probe};

/// Install the default modules at their latest version and the extra module
/// at its pinned version.
#[derive(Debug, Clone, Copy)]
pub struct InstallDependencies;

/// Requirements for `runtime`, in configuration order.
///
/// A default module that names the extra module is dropped so the pin wins.
#[must_use]
pub fn requirements(runtime: &RuntimeSettings) -> Vec<Requirement> {
    let pinned = normalize_name(&runtime.extra_module);
    let mut reqs: Vec<Requirement> = Vec::new();
    for module in &runtime.default_modules {
        let name = normalize_name(module);
        if name == pinned || reqs.iter().any(|r| normalize_name(r.name()) == name) {
            continue;
        }
        reqs.push(Requirement::Latest(module.clone()));
    }
    reqs.push(Requirement::Pinned {
        name: runtime.extra_module.clone(),
        version: runtime.extra_module_version.clone(),
    });
    reqs
}

fn unsatisfied(ctx: &Context) -> Result<Vec<Requirement>, StepError> {
    let installed = ctx
        .host
        .dependencies
        .installed(&ctx.config.runtime.version)?;
    Ok(requirements(&ctx.config.runtime)
        .into_iter()
        .filter(|r| !r.is_satisfied_by(&installed))
        .collect())
}

fn render(reqs: &[Requirement]) -> String {
    reqs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConvergenceStep for InstallDependencies {
    fn name(&self) -> &str {
        "install-dependencies"
    }

    fn description(&self, config: &Config) -> String {
        format!(
            "pip install {} for python {}",
            render(&requirements(&config.runtime)),
            config.runtime.version
        )
    }

    fn check(&self, ctx: &Context) -> Result<Probe, StepError> {
        let missing = unsatisfied(ctx)?;
        if missing.is_empty() {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Unsatisfied(format!("missing: {}", render(&missing))))
        }
    }

    fn apply(&self, ctx: &Context) -> Result<(), StepError> {
        let missing = unsatisfied(ctx)?;
        if missing.is_empty() {
            return Ok(());
        }
        ctx.log.info(&format!("installing {}", render(&missing)));
        ctx.host
            .dependencies
            .install(&ctx.config.runtime.version, &missing)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::test_helpers::scenario_config;
    use crate::host::test_helpers::FakeHost;
    use crate::steps::test_helpers::context;

    #[test]
    fn scenario_requirements_pin_the_extra_module() {
        let reqs = requirements(&scenario_config().runtime);
        let rendered: Vec<String> = reqs.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["boto", "docopt", "docker-py==1.9.0"]);
    }

    #[test]
    fn pinned_request_differs_from_unpinned() {
        let mut runtime = scenario_config().runtime;
        runtime.default_modules.push("docker_py".to_string());
        let reqs = requirements(&runtime);
        assert!(!reqs.contains(&Requirement::Latest("docker_py".to_string())));
        assert_eq!(reqs.last().unwrap().to_string(), "docker-py==1.9.0");
    }

    #[test]
    fn duplicate_defaults_are_requested_once() {
        let mut runtime = scenario_config().runtime;
        runtime.default_modules = vec!["boto".into(), "Boto".into(), "docopt".into()];
        assert_eq!(requirements(&runtime).len(), 3);
    }

    #[test]
    fn only_unsatisfied_requirements_are_installed() {
        let host = FakeHost::new();
        host.state()
            .modules
            .entry("3.5.1".to_string())
            .or_default()
            .extend([
                ("boto".to_string(), "2.49.0".to_string()),
                ("docker-py".to_string(), "1.10.6".to_string()),
            ]);
        let ctx = context(&host);
        assert_eq!(
            InstallDependencies.check(&ctx).unwrap(),
            Probe::Unsatisfied("missing: docopt, docker-py==1.9.0".to_string())
        );
        InstallDependencies.apply(&ctx).unwrap();
        assert_eq!(
            host.operations(),
            vec!["pip install docopt docker-py==1.9.0"]
        );
        assert_eq!(InstallDependencies.check(&ctx).unwrap(), Probe::Satisfied);
    }

    #[test]
    fn satisfied_modules_trigger_no_install() {
        let host = FakeHost::new();
        let ctx = context(&host);
        InstallDependencies.apply(&ctx).unwrap();
        InstallDependencies.apply(&ctx).unwrap();
        assert_eq!(host.operations().len(), 1);
    }
}
