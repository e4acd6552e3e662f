mod cli;

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;

use cs_av::{CutJob, CutSettings, FfmpegTranscoder, ToolRegistry, Transcode};
use cs_core::config::{Config, SeekMode};
use cs_core::StreamKind;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path);
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting cutsmith server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    cs_server::start(config).await?;
    tracing::info!("Shut down cleanly");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise pick defaults from the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "cutsmith=trace,cs_server=trace,cs_av=trace,cs_store=debug,cs_core=debug,tower_http=debug"
                .to_string()
        } else {
            "cutsmith=debug,cs_server=debug,cs_av=debug,cs_store=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::Cut {
            input,
            output,
            start,
            end,
            accurate,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            let job = CutJob {
                input,
                output,
                start,
                end,
            };
            rt.block_on(cut_file(job, accurate, cli.config.as_deref()))
        }
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("cutsmith {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn transcoder_for(config: &Config, accurate: bool) -> FfmpegTranscoder {
    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    let mut settings = CutSettings::from(&config.export);
    if accurate {
        settings.seek_mode = SeekMode::Accurate;
    }
    FfmpegTranscoder::new(tools, settings)
}

fn format_clock(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60
    )
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = Config::load_or_default(config_path);
    let summary = transcoder_for(&config, false).probe(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Container: {}", summary.container);
    if let Some(size) = summary.size {
        println!("Size: {} bytes", size);
    }
    println!("Duration: {}", format_clock(summary.duration));

    println!("\nStreams: {}", summary.streams.len());
    for stream in &summary.streams {
        print!("  [{}] {:?} {}", stream.index, stream.kind, stream.codec);
        match stream.kind {
            StreamKind::Video => {
                if let (Some(w), Some(h)) = (stream.width, stream.height) {
                    print!(" {}x{}", w, h);
                }
            }
            StreamKind::Audio => {
                if let Some(ch) = stream.channels {
                    print!(" {}ch", ch);
                }
            }
            _ => {}
        }
        if let Some(ref lang) = stream.language {
            print!(" ({})", lang);
        }
        println!();
    }

    if !summary.chapters.is_empty() {
        println!("\nChapters: {}", summary.chapters.len());
        for (i, chapter) in summary.chapters.iter().enumerate() {
            println!(
                "  {}. {} - {} {}",
                i + 1,
                format_clock(chapter.start),
                format_clock(chapter.end),
                chapter.title.as_deref().unwrap_or("")
            );
        }
    }

    Ok(())
}

async fn cut_file(job: CutJob, accurate: bool, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path);
    let transcoder = transcoder_for(&config, accurate);

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let progress = |pct: f64| {
        print!("\rCutting... {:5.1}%", pct);
        let _ = std::io::stdout().flush();
    };

    let result = transcoder
        .cut(&job, Some(&progress), &cancel)
        .await
        .with_context(|| format!("cutting {}", job.input.display()));
    watcher.abort();
    println!();
    result?;

    println!(
        "Wrote {} ({} - {})",
        job.output.display(),
        format_clock(job.start),
        format_clock(job.end)
    );
    Ok(())
}

async fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.tools).check_all().await;
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All tools are available!");
    } else {
        println!("Some tools are missing. Cutting needs ffmpeg and ffprobe; URL downloads need yt-dlp.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("reading {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration has {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  - {}", warning);
        }
    }
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Storage: {}",
        config.storage.resolved_base_path().display()
    );
    println!(
        "  Export: {} ({:?} seek, smart cut {})",
        config.export.default_format,
        config.export.seek_mode,
        if config.export.smart_cut { "on" } else { "off" }
    );
    println!(
        "  Jobs: {} concurrent, {} queued",
        config.jobs.max_concurrent, config.jobs.max_queued
    );

    Ok(())
}
