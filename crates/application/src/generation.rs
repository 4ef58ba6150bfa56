//! Immutable configuration generations.
//!
//! A generation is the fully computed shape of one device's acquisition:
//! the condition-filtered active specs plus the batched read plan. Reload
//! builds a complete new generation off to the side and swaps it in behind
//! an Arc; a live generation is never patched.

use std::collections::{HashMap, HashSet};

use domain::condition;
use domain::error::{DomainError, Result};
use domain::plan::{self, RegisterGroup};
use domain::register::RegisterSpec;
use domain::DeviceContext;

/// Planner inputs that are fixed per device.
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    pub max_batch_words: u16,
    pub gap_merge_threshold: u16,
}

#[derive(Debug)]
pub struct Generation {
    /// Monotonic per-device counter; in-flight results from an older id are
    /// discarded instead of written to the cache.
    pub id: u64,
    pub context: DeviceContext,
    /// Active specs, write-only controls included.
    pub specs: Vec<RegisterSpec>,
    /// Read plan over the readable active specs, ascending address order.
    pub groups: Vec<RegisterGroup>,
}

impl Generation {
    /// Build a generation from the template's full spec list. Any config
    /// problem rejects the whole generation; the device does not go live on
    /// a broken template.
    pub fn build(
        id: u64,
        context: DeviceContext,
        template_specs: &[RegisterSpec],
        limits: PlanLimits,
    ) -> Result<Self> {
        let mut active: Vec<RegisterSpec> = Vec::new();
        for spec in template_specs {
            spec.validate(limits.max_batch_words)?;
            let included = match &spec.condition {
                Some(expr) => condition::evaluate(expr, &context),
                None => true,
            };
            if included {
                active.push(spec.clone());
            }
        }

        let mut seen = HashSet::new();
        for spec in &active {
            if !seen.insert(spec.unique_id.as_str()) {
                return Err(DomainError::Config(format!(
                    "duplicate unique_id '{}' in active set",
                    spec.unique_id
                )));
            }
        }

        detect_dependency_cycles(&active)?;

        let groups = plan::plan(
            &active,
            context.slave_id,
            limits.max_batch_words,
            limits.gap_merge_threshold,
        );

        Ok(Self {
            id,
            context,
            specs: active,
            groups,
        })
    }

    pub fn find_spec(&self, unique_id: &str) -> Option<&RegisterSpec> {
        self.specs.iter().find(|s| s.unique_id == unique_id)
    }
}

/// Reject circular `depends_on` chains among the active set. Cross-device
/// references leave the graph and cannot cycle within one build; they
/// resolve through cache snapshots at poll time.
fn detect_dependency_cycles(specs: &[RegisterSpec]) -> Result<()> {
    let index: HashMap<&str, &RegisterSpec> = specs
        .iter()
        .map(|s| (s.unique_id.as_str(), s))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for spec in specs {
        if marks.contains_key(spec.unique_id.as_str()) {
            continue;
        }
        // Iterative DFS; chains are short but recursion depth should not
        // depend on template contents.
        let mut stack: Vec<(&str, bool)> = vec![(spec.unique_id.as_str(), false)];
        while let Some((uid, children_done)) = stack.pop() {
            if children_done {
                marks.insert(uid, Mark::Done);
                continue;
            }
            match marks.get(uid) {
                Some(Mark::Done) => continue,
                Some(Mark::Visiting) => {
                    return Err(DomainError::Config(format!(
                        "circular register dependency involving '{uid}'"
                    )));
                }
                None => {}
            }
            marks.insert(uid, Mark::Visiting);
            stack.push((uid, true));
            if let Some(next) = index
                .get(uid)
                .and_then(|s| s.depends_on.as_ref())
                .map(|d| d.register.as_str())
            {
                if let Some(mark) = marks.get(next) {
                    if *mark == Mark::Visiting {
                        return Err(DomainError::Config(format!(
                            "circular register dependency involving '{next}'"
                        )));
                    }
                } else if index.contains_key(next) {
                    stack.push((next, false));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::register::DependsOn;

    fn limits() -> PlanLimits {
        PlanLimits {
            max_batch_words: 125,
            gap_merge_threshold: 10,
        }
    }

    fn ctx() -> DeviceContext {
        DeviceContext::new(1, "inverter", "SH10RT").with("phases", 3i64)
    }

    fn dep(register: &str) -> DependsOn {
        DependsOn {
            register: register.into(),
            expected: None,
            fallback: None,
        }
    }

    #[test]
    fn test_condition_filters_inactive_specs() {
        let specs = vec![
            RegisterSpec::new("phase_a_voltage", 100),
            RegisterSpec::new("phase_c_voltage", 102).with_condition("phases > 1"),
            RegisterSpec::new("battery_soc", 200).with_condition("battery_enabled == true"),
        ];
        let generation = Generation::build(1, ctx(), &specs, limits()).unwrap();
        let ids: Vec<&str> = generation.specs.iter().map(|s| s.unique_id.as_str()).collect();
        assert_eq!(ids, vec!["phase_a_voltage", "phase_c_voltage"]);
    }

    #[test]
    fn test_duplicate_unique_id_rejected() {
        let specs = vec![
            RegisterSpec::new("soc", 100),
            RegisterSpec::new("soc", 101),
        ];
        let err = Generation::build(1, ctx(), &specs, limits()).unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }

    #[test]
    fn test_duplicate_resolved_by_conditions_is_fine() {
        // Same unique_id declared twice with disjoint conditions is the
        // template idiom for model variants.
        let specs = vec![
            RegisterSpec::new("power", 100).with_condition("phases == 1"),
            RegisterSpec::new("power", 200).with_condition("phases > 1"),
        ];
        let generation = Generation::build(1, ctx(), &specs, limits()).unwrap();
        assert_eq!(generation.specs.len(), 1);
        assert_eq!(generation.specs[0].address, 200);
    }

    #[test]
    fn test_dependency_cycle_rejected() {
        let specs = vec![
            RegisterSpec::new("a", 100).with_depends_on(dep("b")),
            RegisterSpec::new("b", 101).with_depends_on(dep("c")),
            RegisterSpec::new("c", 102).with_depends_on(dep("a")),
        ];
        let err = Generation::build(1, ctx(), &specs, limits()).unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }

    #[test]
    fn test_dependency_chain_is_allowed() {
        let specs = vec![
            RegisterSpec::new("a", 100).with_depends_on(dep("b")),
            RegisterSpec::new("b", 101).with_depends_on(dep("c")),
            RegisterSpec::new("c", 102),
            // Cross-device reference: not part of this build's graph.
            RegisterSpec::new("d", 103).with_depends_on(dep("battery_soc")),
        ];
        assert!(Generation::build(1, ctx(), &specs, limits()).is_ok());
    }

    #[test]
    fn test_invalid_spec_rejects_whole_generation() {
        let specs = vec![
            RegisterSpec::new("ok", 100),
            RegisterSpec::new("bad", 101).with_transform(0.0, 0.0, None),
        ];
        assert!(Generation::build(1, ctx(), &specs, limits()).is_err());
    }

    #[test]
    fn test_groups_follow_the_active_set() {
        let specs = vec![
            RegisterSpec::new("a", 100),
            RegisterSpec::new("b", 101),
            RegisterSpec::new("c", 300).with_condition("phases == 99"),
        ];
        let generation = Generation::build(1, ctx(), &specs, limits()).unwrap();
        assert_eq!(generation.groups.len(), 1);
        assert_eq!(generation.groups[0].count, 2);
    }
}
