use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, bail};

use swcenter::backends::builtin_registry;
use swcenter::model::app::{App, AppChange, Progress};
use swcenter::model::category::Category;
use swcenter::plugin::outcome::Aggregate;
use swcenter::{AppList, Cancellable, HostConfig, PluginManager};

const USAGE: &str = "usage: swcenter <plugins | search <terms..> | updates | sources | categories | \
install <id> | remove <id> | url <url> | file <path> | events>";

fn main() -> Result<()> {
    // Initialize logging to file (never stdout)
    let log_dir = directories::ProjectDirs::from("", "", "swcenter")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("/tmp"));
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "swcenter.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter("swcenter=info")
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        bail!(USAGE);
    };

    tracing::info!(command = %command, "swcenter starting");

    let config = HostConfig::load()?;
    let manager = PluginManager::new(config, builtin_registry());
    let cancellable = Cancellable::new();
    manager.setup(&cancellable)?;

    let result = run(&manager, command, rest, &cancellable);
    manager.shutdown();

    if let Err(e) = &result {
        tracing::error!("{e:#}");
    }
    result
}

fn run(
    manager: &PluginManager,
    command: &str,
    args: &[String],
    cancellable: &Cancellable,
) -> Result<()> {
    match command {
        "plugins" => {
            println!("{}", manager.summary_notification());
            for info in manager.plugins() {
                let enabled = if info.enabled { "" } else { " (disabled)" };
                println!(
                    "{:<12} {:<10} [{}]{enabled}  {}",
                    info.name,
                    info.kind,
                    info.status,
                    info.capabilities
                        .iter()
                        .map(|c| c.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        "search" => {
            if args.is_empty() {
                bail!("search needs at least one term");
            }
            print_apps(manager.search(&args.join(" "), cancellable)?);
        }
        "updates" | "sources" => {
            let aggregate = if command == "updates" {
                manager.list_updates(cancellable)?
            } else {
                manager.list_sources(cancellable)?
            };
            aggregate.value.sort_by_name();
            print_apps(aggregate);
        }
        "categories" => {
            let aggregate = manager.list_categories(cancellable)?;
            for category in &aggregate.value {
                print_category(category, 0);
            }
            print_failures(&aggregate);
        }
        "install" | "remove" => {
            let id = args.first().context("missing app id")?;
            let app = manager.app_create(id)?;
            watch_progress(&app);
            if command == "install" {
                manager.install(&app, cancellable)?;
            } else {
                manager.remove(&app, cancellable)?;
            }
            println!("{} is now {}", app.id(), app.state());
        }
        "url" => {
            let url = args.first().context("missing url")?;
            print_app(&manager.url_to_app(url, cancellable)?);
        }
        "file" => {
            let path = PathBuf::from(args.first().context("missing path")?);
            print_app(&manager.file_to_app(&path, cancellable)?);
        }
        "events" => {
            for event in manager.events() {
                println!("{event}");
            }
        }
        other => bail!("unknown command {other}\n{USAGE}"),
    }
    Ok(())
}

/// Echo state and progress changes of `app` to stderr.
fn watch_progress(app: &Arc<App>) {
    let changes = app.subscribe();
    let id = app.id().to_string();
    thread::spawn(move || {
        for change in changes {
            match change {
                AppChange::Progress(Progress::Percent(p)) => eprint!("\r{id}: {p:>3}%"),
                AppChange::State(state) => eprintln!("\r{id}: {state}"),
                _ => {}
            }
        }
    });
}

fn print_app(app: &Arc<App>) {
    println!(
        "{:<48} {:<24} {:<16} {}",
        app.id().to_string(),
        app.display_name(),
        app.state().to_string(),
        app.management_plugin().unwrap_or_else(|| "-".to_string())
    );
}

fn print_apps(aggregate: Aggregate<AppList>) {
    for app in aggregate.value.snapshot() {
        print_app(&app);
    }
    print_failures(&aggregate);
}

fn print_failures<T>(aggregate: &Aggregate<T>) {
    for failure in &aggregate.failures {
        eprintln!("warning: {}: {}", failure.plugin, failure.error);
    }
}

fn print_category(category: &Category, depth: usize) {
    println!("{:indent$}{} ({})", "", category.name, category.id, indent = depth * 2);
    for child in &category.children {
        print_category(child, depth + 1);
    }
}
