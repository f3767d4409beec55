//! ilotoki command-line translator
//!
//! Downloads the model on first use and translates between Toki Pona and
//! English, Russian or Vietnamese entirely offline.

use std::io::Write;
use std::path::PathBuf;
use std::pin::pin;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use ilotoki_app::{Form, Settings, Translator};
use ilotoki_cli::progress::{download_bar, follow_acquisition, show_event};
use ilotoki_engine::{Language, TranslationRequest};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ilotoki: offline Toki Pona translator
#[derive(Parser, Debug)]
#[command(name = "ilotoki")]
#[command(about = "Offline Toki Pona translator")]
struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: the user's config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download the model file without loading it.
    Fetch {
        /// Download from this URL instead of the configured one
        #[arg(long)]
        url: Option<String>,
    },

    /// Translate a query, streaming the answer to stdout.
    ///
    /// Downloads and loads the model first if needed.
    Translate {
        /// Text to translate (joined with spaces)
        #[arg(required = true)]
        query: Vec<String>,

        /// Language on the other side: English, Russian or Vietnamese (or en/ru/vi)
        #[arg(short, long)]
        language: Option<Language>,

        /// Translate into Toki Pona instead of out of it
        #[arg(short, long, conflicts_with = "from_toki_pona")]
        into_toki_pona: bool,

        /// Translate out of Toki Pona (the usual default)
        #[arg(short, long)]
        from_toki_pona: bool,

        /// Remember the language and direction for later runs
        #[arg(long)]
        save: bool,
    },

    /// Show where the model lives and whether it is downloaded.
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete the downloaded model.
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "ilotoki=debug,ilotoki_cli=debug,ilotoki_app=debug,ilotoki_engine=debug"
    } else {
        "ilotoki=warn,ilotoki_cli=warn,ilotoki_app=warn,ilotoki_engine=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Fetch { url } => run_fetch(&settings, url).await,
        Commands::Translate {
            query,
            language,
            into_toki_pona,
            from_toki_pona,
            save,
        } => {
            let from_toki_pona = if into_toki_pona {
                false
            } else {
                from_toki_pona || settings.translation.from_toki_pona
            };
            let form = Form {
                query: query.join(" "),
                from_toki_pona,
                language: language.unwrap_or(settings.translation.language),
            };
            if save {
                settings.translation.language = form.language;
                settings.translation.from_toki_pona = form.from_toki_pona;
                match &cli.config {
                    Some(path) => settings.save_to(path)?,
                    None => settings.save()?,
                }
            }
            run_translate(&settings, form).await
        }
        Commands::Status { json } => run_status(&settings, json).await,
        Commands::Clean => run_clean(&settings).await,
    }
}

// --- fetch ---

async fn run_fetch(settings: &Settings, url: Option<String>) -> Result<()> {
    let mut asset = settings.model_asset()?;
    if let Some(url) = url {
        asset = asset.with_url(url);
    }
    let store = settings.model_store()?;
    store
        .ensure_directory()
        .await
        .with_context(|| format!("Failed to create {}", store.dir().display()))?;

    let path = store.path_for(&asset);
    if store.exists(&path).await {
        println!("Model already on disk: {}", path.display());
        return Ok(());
    }

    eprintln!("Downloading {}", asset.url);
    let pb = download_bar();
    let fetcher = settings.fetcher()?;
    let mut events = pin!(fetcher.fetch(&asset.url, &path));
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => show_event(&pb, &event),
            Err(e) => {
                pb.abandon();
                return Err(e).with_context(|| format!("Failed to download {}", asset.id));
            }
        }
    }
    pb.finish();

    println!("Saved {}", path.display());
    Ok(())
}

// --- translate ---

async fn run_translate(settings: &Settings, form: Form) -> Result<()> {
    let translator = Translator::from_settings(settings)?;

    let pb = download_bar();
    let follow = tokio::spawn(follow_acquisition(translator.subscribe(), pb.clone()));
    translator.start();
    let ready = translator.wait_ready().await;
    follow.abort();
    pb.finish_and_clear();

    if ready.is_none() {
        bail!("{}", translator.status_line());
    }

    let request: TranslationRequest = form.request();
    tracing::debug!("{} -> {}", request.source(), request.target());

    let mut stdout = std::io::stdout().lock();
    translator
        .submit(form, |fragment| {
            // A closed stdout only loses output
            let _ = stdout.write_all(fragment.as_bytes());
            let _ = stdout.flush();
        })
        .await?;
    writeln!(stdout)?;
    Ok(())
}

// --- status ---

#[derive(Debug, Serialize)]
struct StatusReport {
    model: String,
    url: String,
    path: PathBuf,
    on_disk: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    config_file: Option<PathBuf>,
}

async fn run_status(settings: &Settings, json: bool) -> Result<()> {
    let asset = settings.model_asset()?;
    let store = settings.model_store()?;
    let path = store.path_for(&asset);
    let on_disk = store.exists(&path).await;
    let size_bytes = if on_disk {
        tokio::fs::metadata(&path).await.ok().map(|m| m.len())
    } else {
        None
    };

    let report = StatusReport {
        model: asset.id,
        url: asset.url,
        path,
        on_disk,
        size_bytes,
        config_file: Settings::config_file(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("model:   {}", report.model);
    println!("url:     {}", report.url);
    println!("path:    {}", report.path.display());
    match report.size_bytes {
        Some(bytes) => println!(
            "on disk: yes ({:.2} GiB)",
            bytes as f64 / (1024.0 * 1024.0 * 1024.0)
        ),
        None => println!("on disk: no"),
    }
    if let Some(config) = &report.config_file {
        println!("config:  {}", config.display());
    }
    Ok(())
}

// --- clean ---

async fn run_clean(settings: &Settings) -> Result<()> {
    let store = settings.model_store()?;
    if store.is_empty().await {
        println!("Nothing to remove in {}", store.dir().display());
        return Ok(());
    }
    store
        .delete()
        .await
        .with_context(|| format!("Failed to remove {}", store.dir().display()))?;
    println!("Removed {}", store.dir().display());
    Ok(())
}
