//! List command - show the predefined cases.

use anyhow::Result;
use bench_harness::Suite;

/// Run the list command.
pub fn run() -> Result<()> {
    for suite in [Suite::Replication, Suite::Basics] {
        println!("{}:", suite);
        for case in suite.cases()? {
            println!("  {:<40} {:>6} iterations", case.name(), case.iterations());
        }
        println!();
    }
    println!("Use `docbench run --skimdb <url>` to add an external-source case.");
    Ok(())
}
