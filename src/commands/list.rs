use anyhow::Result;
use dumpsync::config::Config;
use dumpsync::dumps::{DumpCatalog, DumpContentType, DumpFile};
use tracing::info;

pub fn list_dumps(config: Config, content_type: Option<String>, full_history: bool) -> Result<()> {
    let catalog = DumpCatalog::from_config(&config.dumps)?;

    let (title, dumps) = match content_type {
        Some(name) => {
            let content_type: DumpContentType = name.parse()?;
            info!(project = %catalog.project(), content_type = %content_type, "Listing dumps");
            (format!("{} dumps", content_type), catalog.all_dumps(content_type))
        }
        None => (
            "Covering set".to_string(),
            catalog.select_covering_set(!full_history),
        ),
    };

    println!("\n{} for {}:", title, catalog.project());
    println!("{}", "=".repeat(title.len() + catalog.project().len() + 6));
    if dumps.is_empty() {
        println!("(none)");
    }
    for dump in &dumps {
        print_dump(dump.as_ref());
    }
    Ok(())
}

fn print_dump(dump: &dyn DumpFile) {
    let location = if dump.is_local() { "local" } else { "remote" };
    let available = if dump.is_available() { "available" } else { "pending" };
    match dump.max_revision_id() {
        Some(id) if id > 0 => println!(
            "{:<40} {:<7} {:<10} max revision {}",
            dump.descriptor().to_string(),
            location,
            available,
            id
        ),
        _ => println!(
            "{:<40} {:<7} {}",
            dump.descriptor().to_string(),
            location,
            available
        ),
    }
}
