//! Stack CLI - render and inspect the COCO Annotator stack
//!
//! Usage:
//!   stack synth [--out FILE]       Render the template
//!   stack validate [TEMPLATE]      Check a rendered template
//!   stack diff <DEPLOYED>          Compare a deployed template with the current one
//!   stack list                     Show resources in deployment order
//!   stack config                   Show the effective configuration

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use coco_stack::config::{StackConfig, Variant};
use coco_stack::deps::DepGraph;
use coco_stack::diff::{self, Change};
use coco_stack::template::Template;
use coco_stack::validate::{self, Severity};
use coco_stack::{annotator, output};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "stack")]
#[command(about = "Render and inspect the COCO Annotator infrastructure stack")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Preset to start from (overrides `variant` in the config file)
    #[arg(long, global = true, value_enum)]
    variant: Option<Variant>,

    /// TOML file layered over the preset
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Target account (environment-agnostic if unset)
    #[arg(long, global = true, env = "CDK_DEFAULT_ACCOUNT")]
    account: Option<String>,

    /// Target region (environment-agnostic if unset)
    #[arg(long, global = true, env = "CDK_DEFAULT_REGION")]
    region: Option<String>,

    /// Stack name
    #[arg(long, global = true)]
    stack_name: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the template as JSON
    Synth {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Run structural checks on a template
    Validate {
        /// Rendered template (a fresh synthesis if not specified)
        template: Option<PathBuf>,
    },

    /// Compare a deployed template with the current synthesis
    Diff {
        /// Template of the deployed stack
        deployed: PathBuf,
    },

    /// List resources in deployment order
    List,

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = StackConfig::load(cli.variant, cli.config.as_deref())?.with_overrides(
        cli.stack_name,
        cli.account,
        cli.region,
    );

    match cli.command {
        Commands::Synth { out } => synth(&config, out.as_deref())?,
        Commands::Validate { template } => validate_template(&config, template.as_deref())?,
        Commands::Diff { deployed } => diff_template(&config, &deployed)?,
        Commands::List => list_resources(&config)?,
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

fn render(config: &StackConfig) -> Result<Template> {
    annotator::synth(config)
        .with_context(|| format!("Failed to define stack {}", config.stack_name))
}

fn synth(config: &StackConfig, out: Option<&Path>) -> Result<()> {
    output::quiet(out.is_none());
    output::action(&format!("Synthesizing {}", config.stack_name));

    let template = render(config)?;
    let findings = validate::validate(&template, &config.expectations());
    for finding in &findings {
        output::finding(finding);
    }
    if validate::has_errors(&findings) {
        output::error("rendered template fails its own checks, see `stack validate`");
    }

    match out {
        Some(path) => {
            template.save(path)?;
            output::detail(&format!("wrote {}", path.display()));
            output::success(&format!(
                "{} resources, {} parameters, {} outputs",
                template.resources.len(),
                template.parameters.len(),
                template.outputs.len()
            ));
        }
        None => println!(
            "{}",
            template.to_json_pretty().context("Failed to serialize template")?
        ),
    }
    Ok(())
}

fn validate_template(config: &StackConfig, path: Option<&Path>) -> Result<()> {
    let template = match path {
        Some(path) => {
            output::action(&format!("Validating {}", path.display()));
            Template::load(path)?
        }
        None => {
            output::action(&format!("Validating fresh synthesis of {}", config.stack_name));
            render(config)?
        }
    };

    let findings = validate::validate(&template, &config.expectations());
    if findings.is_empty() {
        output::success("No problems found");
        return Ok(());
    }

    for finding in &findings {
        output::finding(finding);
    }
    let errors = findings.iter().filter(|f| f.severity == Severity::Error).count();
    if errors > 0 {
        bail!("{} of {} checks failed", errors, findings.len());
    }
    output::warning(&format!("{} warning(s)", findings.len()));
    Ok(())
}

fn diff_template(config: &StackConfig, deployed: &Path) -> Result<()> {
    let deployed_template = Template::load(deployed)?;
    let desired = render(config)?;
    let changes = diff::diff(&deployed_template, &desired);

    output::action(&format!("Changes to {}", config.stack_name));
    if changes.is_empty() {
        output::skip("no changes");
        return Ok(());
    }

    for (id, change) in &changes.resources {
        let status = if change.replacement {
            format!("{} (replacement)", change.kind)
        } else {
            change.kind.clone()
        };
        output::change(change.change.marker(), id, &status);
        for property in &change.properties {
            let note = if property.replacement { " requires replacement" } else { "" };
            output::detail(&format!("{}{}", property.name, note));
        }
    }
    for (section, entries) in [("parameter", &changes.parameters), ("output", &changes.outputs)] {
        for (name, change) in entries {
            output::change(change.marker(), name, section);
        }
    }

    let replaced = changes.replacements();
    if !replaced.is_empty() {
        output::warning(&format!("{} resource(s) will be replaced: {}", replaced.len(), replaced.join(", ")));
    }
    let added = changes.resources.values().filter(|c| c.change == Change::Added).count();
    let removed = changes.resources.values().filter(|c| c.change == Change::Removed).count();
    output::info(&format!(
        "{} to add, {} to change, {} to remove",
        added,
        changes.resources.len() - added - removed,
        removed
    ));
    Ok(())
}

fn list_resources(config: &StackConfig) -> Result<()> {
    let template = render(config)?;
    let graph = DepGraph::from_template(&template);
    let waves = graph.deployment_waves()?;

    output::info(&format!(
        "Deployment order for {} ({} resources):",
        config.stack_name,
        graph.len()
    ));
    for (i, wave) in waves.iter().enumerate() {
        output::action(&format!("Wave {}", i + 1));
        for id in wave {
            let kind = template.resources.get(id).map(|r| r.kind.as_str()).unwrap_or_default();
            let has_deps = !graph.dependencies(id).is_empty();
            output::list_item(id, kind, !has_deps);
        }
    }
    Ok(())
}
