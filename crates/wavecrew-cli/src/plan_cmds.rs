//! Offline handlers for `wavecrew plan` subcommands.
//!
//! Implements:
//! - `wavecrew plan validate <file> [--resolve] [--max-passes N]`

use anyhow::{Context, Result, bail};

use wavecrew_core::scope::{
    ObjectivePlan, ScopeError, ScopeValidation, check_global_forbid, group_into_waves, parse_objective_plan, schedule,
    validate,
};

use crate::PlanCommands;

/// Dispatch a `PlanCommands` variant to the appropriate handler.
pub fn run_plan_command(command: PlanCommands) -> Result<()> {
    match command {
        PlanCommands::Validate {
            file,
            resolve,
            max_passes,
        } => cmd_validate(&file, resolve, max_passes),
    }
}

/// Read and parse an objective plan file.
pub fn load_plan(file_path: &str) -> Result<ObjectivePlan> {
    let content = std::fs::read_to_string(file_path)
        .with_context(|| format!("failed to read objective plan: {file_path}"))?;
    parse_objective_plan(&content).with_context(|| format!("failed to parse objective plan: {file_path}"))
}

// -----------------------------------------------------------------------
// wavecrew plan validate <file>
// -----------------------------------------------------------------------

fn cmd_validate(file_path: &str, resolve: bool, max_passes: usize) -> Result<()> {
    let plan = load_plan(file_path)?;
    println!("Plan: {file_path} ({} objectives)", plan.objectives.len());
    if !plan.global_forbid.is_empty() {
        println!("Global forbid: {}", plan.global_forbid.join(", "));
    }
    println!();

    if !resolve {
        return report_only(&plan);
    }

    let result = match schedule(plan.objectives, &plan.global_forbid, max_passes) {
        Ok(result) => result,
        Err(ScopeError::Unresolved { passes, conflicts }) => {
            print_conflicts(&conflicts);
            bail!("scope conflicts remain after {passes} resolution passes");
        }
        Err(e) => return Err(e.into()),
    };

    if !result.initial_validation.valid {
        print_conflicts(&result.initial_validation.conflicts);
        println!();
    }
    if !result.resolution.deferrals.is_empty() {
        println!("Deferred ({} passes):", result.resolution.passes);
        for d in &result.resolution.deferrals {
            println!("  {} : wave {} -> {}", d.objective, d.from_wave, d.to_wave);
        }
        println!();
    }

    print_waves(&result.waves);
    if !result.contracts.is_empty() {
        println!();
        println!("Integration contracts:");
        for c in &result.contracts {
            println!("  {}", c.description);
        }
    }
    println!();
    println!("Estimated duration: {}", result.estimated_duration);
    Ok(())
}

/// Validate without moving anything; conflicts fail the command.
fn report_only(plan: &ObjectivePlan) -> Result<()> {
    let violations = check_global_forbid(&plan.objectives, &plan.global_forbid);
    for v in &violations {
        println!("  [!] {} touches globally forbidden paths: {}", v.objective, v.paths.join(", "));
    }

    let validation: ScopeValidation = validate(&plan.objectives);
    print_waves(&group_into_waves(&plan.objectives));
    println!();

    if !violations.is_empty() {
        bail!("{} objectives touch globally forbidden paths", violations.len());
    }
    if !validation.valid {
        print_conflicts(&validation.conflicts);
        bail!(
            "{} scope conflicts found (rerun with --resolve to defer them)",
            validation.conflicts.len()
        );
    }

    println!(
        "Valid: {} objectives across {} waves, no conflicts.",
        validation.total_objectives, validation.waves_checked
    );
    Ok(())
}

fn print_conflicts(conflicts: &[wavecrew_core::scope::ScopeConflict]) {
    println!("Conflicts:");
    for c in conflicts {
        println!(
            "  [!] wave {}: {} <-> {} on {}",
            c.wave,
            c.objective1,
            c.objective2,
            c.overlap.join(", ")
        );
    }
}

fn print_waves(waves: &[wavecrew_core::scope::Wave]) {
    for wave in waves {
        println!("Wave {}:", wave.number);
        for obj in &wave.objectives {
            println!(
                "  - {} [{}] touch: {}",
                obj.title,
                obj.worker,
                obj.scope_touch.join(", ")
            );
        }
    }
}
