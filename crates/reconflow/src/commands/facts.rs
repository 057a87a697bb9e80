use super::Loaded;
use colored::Colorize;
use reconflow_cloud::ResourceKind;

pub async fn handle(
    loaded: &Loaded,
    kind: Option<ResourceKind>,
    name: Option<&str>,
) -> anyhow::Result<bool> {
    let selected = loaded.desired.filtered(kind, name);
    if selected.is_empty() {
        println!("{}", "No resources match".yellow());
        return Ok(true);
    }

    let driver = super::driver(loaded);
    let mut ok = true;
    for descriptor in selected.descriptors() {
        let identity = descriptor.identity();
        match driver.facts(descriptor).await {
            Ok(facts) if facts.is_empty() => {
                println!("{} {}", identity, "(absent)".dimmed());
            }
            Ok(facts) => {
                println!("{}", identity.to_string().bold());
                for (key, value) in &facts {
                    println!("    {} = {}", key.cyan(), value);
                }
            }
            Err(e) => {
                ok = false;
                println!("{} {} {}", "✗".red().bold(), identity, e.to_string().red());
            }
        }
    }
    Ok(ok)
}
