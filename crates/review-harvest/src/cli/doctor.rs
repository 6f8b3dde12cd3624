//! Environment readiness check.

use std::path::Path;

use anyhow::Result;

use review_harvest::renderer::chromium::find_chromium;
use review_harvest::{HarvestConfig, RuleBook};

/// Check Chromium availability, configuration and the rule book.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    println!("Review Harvest Doctor");
    println!("=====================");
    println!();

    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    let chromium = find_chromium();
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Install Chrome or set REVIEW_HARVEST_CHROMIUM_PATH."
        ),
    }

    let config = match HarvestConfig::load(config_path) {
        Ok(config) => {
            println!("[OK] Configuration valid");
            Some(config)
        }
        Err(e) => {
            println!("[!!] Configuration invalid: {e}");
            None
        }
    };

    let rules_path = config.as_ref().and_then(|c| c.run.rules_path.clone());
    let rules_ok = match RuleBook::load(rules_path.as_deref()) {
        Ok(rules) => {
            println!(
                "[OK] Rule book loaded: {} fragment rules, {} pagination rules",
                rules.fragments.len(),
                rules.pagination.selectors.len()
            );
            true
        }
        Err(e) => {
            println!("[!!] Rule book invalid: {e}");
            false
        }
    };

    println!();
    if chromium.is_some() && config.is_some() && rules_ok {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
        if chromium.is_none() {
            println!("  Offline runs still work with `review-harvest harvest --snapshot <file>`.");
        }
    }

    Ok(())
}
