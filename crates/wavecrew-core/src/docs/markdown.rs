//! Markdown renderings of the run artifacts.

use std::fmt::Write as _;

use crate::engine::artifacts::{AccomplishmentReport, AnalysisReport, CoordinationPlan};

const FOOTER: &str = "---\n*Generated by wavecrew*\n";

/// Shown when a bulleted list would otherwise be empty.
const NONE_ITEM: &str = "- None\n";

fn bullets<'a>(out: &mut String, items: impl IntoIterator<Item = &'a String>) {
    let mut any = false;
    for item in items {
        let _ = writeln!(out, "- {item}");
        any = true;
    }
    if !any {
        out.push_str(NONE_ITEM);
    }
}

fn timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn render_analysis(report: &AnalysisReport) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Analysis Report");
    let _ = writeln!(md, "**Orchestration:** {}  ", report.orchestration_id);
    let _ = writeln!(md, "**Report ID:** {}  ", report.report_id);
    let _ = writeln!(md, "**Timestamp:** {}  ", timestamp(&report.timestamp));
    let _ = writeln!(md, "**Task Type:** {}\n", report.task_type.as_str().to_uppercase());

    let _ = writeln!(md, "## Owner Request\n{}\n", report.owner_request);

    md.push_str("## Uploaded Files\n");
    bullets(&mut md, &report.uploaded_files);

    md.push_str("\n## Codebase Analysis\n");
    match &report.codebase {
        Some(codebase) => {
            let _ = writeln!(md, "- **Root:** {}", codebase.root_path);
            if let Some(kind) = &codebase.project_type {
                let _ = writeln!(md, "- **Project type:** {kind}");
            }
            let _ = writeln!(md, "- **Entry points:** {}", codebase.entry_points.join(", "));
            let _ = writeln!(md, "- **Tests:** {}", codebase.test_paths.len());
            let _ = writeln!(md, "- **Config files:** {}", codebase.config_files.join(", "));
        }
        None => md.push_str("Not analyzed.\n"),
    }

    md.push_str("\n## Coordination Points\n");
    bullets(&mut md, &report.coordination_points);

    md.push_str("\n## Identified Modules\n");
    bullets(&mut md, &report.identified_modules);

    let _ = writeln!(md, "\n## Scope Allocation Strategy\n{}\n", report.scope_strategy);
    md.push_str("## Next Steps\n1. Create Coordination Plan\n2. Validate scope exclusivity\n3. Execute wave-based coordination\n\n");
    md.push_str(FOOTER);
    md
}

pub fn render_plan(plan: &CoordinationPlan) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Coordination Plan");
    let _ = writeln!(md, "**Plan ID:** {}  ", plan.plan_id);
    let _ = writeln!(md, "**Analysis Report:** {}  ", plan.analysis_report_id);
    let _ = writeln!(md, "**Timestamp:** {}  ", timestamp(&plan.timestamp));
    let _ = writeln!(md, "**Type:** {}  ", plan.plan_type.as_str().to_uppercase());
    let _ = writeln!(md, "**Estimated Duration:** {}\n", plan.estimated_duration);

    md.push_str("## Waves & Objectives\n\n");
    for wave in &plan.waves {
        let _ = writeln!(md, "### Wave {}\n", wave.number);
        for obj in &wave.objectives {
            let _ = writeln!(md, "**Objective:** {}", obj.title);
            let _ = writeln!(md, "- **Worker:** {}", obj.worker);
            let _ = writeln!(md, "- **Scope Touch:** {}", obj.scope_touch.join(", "));
            let shown: Vec<&str> = obj.scope_forbid.iter().take(3).map(String::as_str).collect();
            let more = if obj.scope_forbid.len() > 3 { "..." } else { "" };
            let _ = writeln!(md, "- **Scope Forbid:** {}{more}\n", shown.join(", "));
        }
    }

    md.push_str("## Integration Contracts\n");
    let contracts: Vec<String> = plan.integration_contracts.iter().map(|c| c.description.clone()).collect();
    bullets(&mut md, &contracts);

    md.push_str("\n## Global Forbid\n");
    bullets(&mut md, &plan.global_forbid);

    md.push_str("\n## Scope Validation\n");
    if plan.scope_validation.valid {
        md.push_str("**Status:** VALID\n");
    } else {
        md.push_str("**Status:** CONFLICTS DETECTED\n\n### Conflicts\n");
        for c in &plan.scope_validation.conflicts {
            let _ = writeln!(
                md,
                "- Wave {}: {} / {} overlap on {}",
                c.wave,
                c.objective1,
                c.objective2,
                c.overlap.join(", ")
            );
        }
    }
    if !plan.deferrals.is_empty() {
        md.push_str("\n### Deferrals\n");
        for d in &plan.deferrals {
            let _ = writeln!(md, "- {}: wave {} -> {}", d.objective, d.from_wave, d.to_wave);
        }
    }

    md.push('\n');
    md.push_str(FOOTER);
    md
}

pub fn render_accomplishment(report: &AccomplishmentReport) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Accomplishment Report");
    let _ = writeln!(md, "**Orchestration:** {}  ", report.orchestration_id);
    let _ = writeln!(md, "**Plan:** {}  ", report.plan_id);
    let _ = writeln!(md, "**Timestamp:** {}\n", timestamp(&report.timestamp));

    let _ = writeln!(md, "## Summary\n{}\n", report.summary);

    md.push_str("## Objectives Completed\n");
    bullets(&mut md, &report.objectives_completed);
    if !report.objectives_failed.is_empty() {
        md.push_str("\n## Objectives Failed\n");
        bullets(&mut md, &report.objectives_failed);
    }

    md.push_str("\n## Files Modified\n");
    bullets(&mut md, &report.files_modified);

    let t = &report.test_results;
    let _ = writeln!(
        md,
        "\n## Test Results\n- **Status:** {}\n- **Tests Run:** {}\n- **Passed:** {}\n- **Failed:** {}",
        t.status, t.total, t.passed, t.failed
    );

    md.push_str("\n## Quality Gates\n");
    for (gate, status) in &report.quality_gates {
        let _ = writeln!(md, "- **{gate}:** {status}");
    }

    let _ = writeln!(md, "\n## Integration Status\n{}", report.integration_status);

    md.push_str("\n## Known Issues\n");
    bullets(&mut md, &report.known_issues);

    md.push_str("\n## Next Steps\n");
    for (i, step) in report.next_steps.iter().enumerate() {
        let _ = writeln!(md, "{}. {step}", i + 1);
    }

    let _ = writeln!(md, "\n## Commit Message\n```\n{}\n```\n", report.commit_message.trim_end());
    md.push_str(FOOTER);
    md
}
