use super::Loaded;
use crate::output;
use colored::Colorize;
use reconflow_cloud::Reconciler;

pub async fn handle(loaded: &Loaded, parallelism: usize) -> anyhow::Result<bool> {
    let driver = super::driver(loaded);
    super::check_auth(&driver, loaded).await?;

    let reconciler = Reconciler::new(driver).with_parallelism(parallelism);
    let run = reconciler.run(&loaded.desired).await;

    println!();
    for report in &run.reports {
        println!("{}", output::report_line(report));
        output::print_warnings(&report.warnings);
    }
    println!();
    let summary = run.summary().to_string();
    if run.has_failures() {
        println!("{}", summary.red().bold());
    } else {
        println!("{}", summary.green().bold());
    }
    Ok(!run.has_failures())
}
