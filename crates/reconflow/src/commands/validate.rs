use super::Loaded;
use colored::Colorize;

pub fn handle(loaded: &Loaded) -> bool {
    println!(
        "Manifest: {}",
        loaded.path.display().to_string().cyan()
    );
    println!("{}", "✓ Manifest is valid".green().bold());
    println!();
    println!("Providers: {}", loaded.manifest.providers.len());
    for provider in &loaded.manifest.providers {
        println!(
            "  - {} ({})",
            provider.name.cyan(),
            provider.zone(None)
        );
    }
    println!("Resources: {}", loaded.desired.len());
    for group in loaded.desired.groups() {
        println!("  {} ({})", group.kind.to_string().bold(), group.descriptors.len());
        for descriptor in &group.descriptors {
            let marker = if descriptor.purged { " [purged]" } else { "" };
            println!("    - {}{}", descriptor.name, marker.yellow());
        }
    }
    true
}
