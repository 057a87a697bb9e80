use super::Loaded;
use crate::output;
use colored::Colorize;
use reconflow_cloud::Reconciler;

pub async fn handle(loaded: &Loaded) -> anyhow::Result<bool> {
    let driver = super::driver(loaded);
    super::check_auth(&driver, loaded).await?;

    let plans = Reconciler::new(driver).plan(&loaded.desired).await;
    let mut pending = 0;
    let mut failed = 0;
    println!();
    for (identity, result) in &plans {
        match result {
            Ok(plan) if plan.has_changes() => {
                pending += 1;
                println!("{} {}", "~".yellow().bold(), identity);
                for change in &plan.changes {
                    println!("    {}", change);
                }
                output::print_warnings(&plan.warnings);
            }
            Ok(plan) => {
                println!("{} {} {}", "=".dimmed(), identity, "no changes".dimmed());
                output::print_warnings(&plan.warnings);
            }
            Err(e) => {
                failed += 1;
                println!("{} {} {}", "✗".red().bold(), identity, e.to_string().red());
            }
        }
    }
    println!();
    println!(
        "{} to change, {} unchanged, {} failed",
        pending,
        plans.len() - pending - failed,
        failed
    );
    Ok(failed == 0)
}
