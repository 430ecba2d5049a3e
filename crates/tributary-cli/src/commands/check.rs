use std::path::Path;

use anyhow::{Context, Result};

use tributary_engine::config::{parser, validator};
use tributary_engine::orchestrator;
use tributary_engine::result::ComponentCheck;

use crate::adapters;

/// Execute the `check` command: validate pipeline config and resolve every component.
pub fn execute(pipeline_path: &Path) -> Result<()> {
    // 1. Parse pipeline YAML
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate pipeline structure
    validator::validate_pipeline(&config)?;
    println!("Pipeline structure: OK");

    // 3. Build components without starting them
    let registry = adapters::registry();
    let result = orchestrator::check_pipeline(&config, &registry)?;

    // 4. Report results
    for component in &result.components {
        print_component(component);
    }

    if result.is_ok() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

fn print_component(component: &ComponentCheck) {
    let label = format!("{} ({}):", component.role, component.name);
    match &component.error {
        None => println!("{label:30} OK"),
        Some(message) => {
            println!("{label:30} FAILED");
            println!("  {message}");
        }
    }
}
