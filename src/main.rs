use std::sync::Arc;

use anyhow::Result;
use mimalloc::MiMalloc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use prompt_pilot::cli::{Cli, Commands, SessionCommand};
use prompt_pilot::{
    models, BrowserClient, Config, FileSessionStore, MemorySessionStore, Pilot, SessionStore,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();
    init_tracing(cli.debug);

    let mut config = Config::from_env();
    if let Some(path) = &cli.session_file {
        config.session_file.clone_from(path);
    }
    config.debug = cli.debug;

    let store: Arc<dyn SessionStore> = if cli.ephemeral {
        Arc::new(MemorySessionStore::new())
    } else {
        Arc::new(FileSessionStore::new(config.session_file.clone()))
    };

    match cli.command {
        Commands::Ask {
            prompt,
            model,
            keep_alive,
            headed,
        } => {
            // reject a bad alias before paying for a browser launch
            if let Some(alias) = &model {
                models::parse_alias_or_fail(alias)
                    .map_err(|e| anyhow::anyhow!("{} failed: {e}", e.stage()))?;
            }
            config.keep_alive |= keep_alive;
            config.headless &= !headed;
            config.validate()?;

            let browser = BrowserClient::launch(&config).await?;
            let pilot = Pilot::new(browser, store, config);
            let outcome = pilot.run_query(&prompt, model.as_deref(), cli.debug).await;
            if let Err(e) = pilot.into_driver().close().await {
                tracing::debug!("browser shutdown: {e:#}");
            }

            match outcome {
                Ok(response) => {
                    println!("{response}");
                    Ok(())
                }
                Err(e) => Err(anyhow::anyhow!("{} failed: {e}", e.stage())),
            }
        }
        Commands::Models => {
            let preferred = store.preferred_model();
            for descriptor in models::all() {
                let mut marks = Vec::new();
                if descriptor.is_default {
                    marks.push("default");
                }
                if preferred == Some(descriptor.id) {
                    marks.push("last used");
                }
                let marks = if marks.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", marks.join(", "))
                };
                println!("{:<6} {}{marks}", descriptor.id.tag(), descriptor.display_name);
                println!("       {}", descriptor.description);
                println!("       aliases: {}", descriptor.aliases.join(", "));
            }
            Ok(())
        }
        Commands::Login => {
            config.headless = false;
            config.validate()?;
            let browser = BrowserClient::launch(&config).await?;
            let pilot = Pilot::new(browser, store, config);
            let result = pilot.login().await;
            if let Err(e) = pilot.into_driver().close().await {
                tracing::debug!("browser shutdown: {e:#}");
            }
            let count = result?;
            println!("Saved {count} cookies.");
            Ok(())
        }
        Commands::Session { command } => {
            match command {
                SessionCommand::Show => match store.load() {
                    Some(record) => {
                        println!("file:        {}", config.session_file.display());
                        println!("version:     {}", record.version);
                        println!("cookies:     {}", record.cookies.len());
                        println!(
                            "model:       {}",
                            record.preferred_model.map_or("-", |m| m.tag())
                        );
                        if let Some(history) = &record.model_selection_history {
                            println!(
                                "selected:    {} via {:?}{}",
                                history.last_selection.to_rfc3339(),
                                history.selection_method,
                                if history.fallback_used { " (dropdown fallback)" } else { "" }
                            );
                        }
                        println!("last used:   {}", record.last_used.to_rfc3339());
                    }
                    None => println!("No stored session."),
                },
                SessionCommand::Clear => {
                    store.clear();
                    println!("Session cleared.");
                }
            }
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "prompt_pilot=debug" } else { "prompt_pilot=info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
