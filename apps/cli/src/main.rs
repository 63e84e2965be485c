use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::style;
use exhibit_core::{
    ClipExtractor, Ffmpeg, Ffprobe, GeminiClient, GeminiConfig, ProcessLog, RunManager,
    UploadCache, UploadManager, Workspace,
    analysis::{PDF_MIME, VIDEO_MIME, list_documents, list_videos, load_focus},
    analyze_video, format_batch_report,
    report::{BatchReport, RunStatus},
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

#[derive(Parser)]
#[command(name = "exhibit")]
#[command(about = "Analyze evidence video with Gemini and cut the identified clips")]
struct Cli {
    /// Case directory holding video/, context/, results/ and dashboard/
    #[arg(long, env = "EXHIBIT_HOME", default_value = ".", global = true)]
    base_dir: String,

    /// Show progress logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload videos and context documents, reusing cached uploads
    Upload {
        /// List local videos with their upload status and exit
        #[arg(long)]
        list: bool,

        /// Drop the cached upload of this file and upload it again
        #[arg(long, value_name = "FILE")]
        force: Vec<PathBuf>,
    },
    /// Analyze every video that has no result yet in the run
    Analyze {
        /// Resume or name a run (e.g. run_20240101_120000)
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Cut the clips of every analysis run that has no output yet
    Clips {
        /// Process only this run, even if it was processed before
        #[arg(long, value_name = "ID")]
        run: Option<String>,
    },
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,exhibit=info,exhibit_core=info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn gemini_client() -> Result<GeminiClient> {
    let config = GeminiConfig::from_env()?;
    Ok(GeminiClient::new(&config)?)
}

async fn upload_all<S>(
    manager: &mut UploadManager<'_, S>,
    paths: &[PathBuf],
    mime_type: &str,
) -> Vec<exhibit_core::RemoteFile>
where
    S: exhibit_core::FileService,
{
    let mut uploaded = Vec::new();
    for path in paths {
        let step_start = Instant::now();
        let spinner = create_spinner(&format!("Uploading {}...", file_label(path)));
        match manager.upload_cached(path, mime_type).await {
            Some(file) => {
                spinner.finish_with_message(format!(
                    "{} {} {} {}",
                    style("✓").green().bold(),
                    file_label(path),
                    style(&file.name).dim(),
                    style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
                ));
                uploaded.push(file);
            }
            None => spinner.finish_with_message(format!(
                "{} {} {}",
                style("✗").red().bold(),
                file_label(path),
                style("upload failed").red()
            )),
        }
    }
    uploaded
}

async fn run_upload(ws: &Workspace, list: bool, force: Vec<PathBuf>) -> Result<()> {
    let videos = list_videos(&ws.video_dir());
    let cache = UploadCache::load(&ws.upload_cache_path()).await;

    if list {
        println!("{}", style("Local video files").bold());
        for (i, video) in videos.iter().enumerate() {
            let status = match cache.get(video) {
                Some(cached) => style(format!("[UPLOADED: {}]", cached.name)).green(),
                None => style("[NOT UPLOADED]".to_string()).yellow(),
            };
            println!("{:>3}. {} {}", i + 1, video.display(), status);
        }
        return Ok(());
    }

    let client = gemini_client()?;
    let mut manager = UploadManager::new(&client, cache);

    for path in &force {
        if manager.forget(path).await? {
            println!(
                "{} Cleared cached upload for {}",
                style("✓").green().bold(),
                path.display()
            );
        }
    }

    upload_all(&mut manager, &videos, VIDEO_MIME).await;
    upload_all(&mut manager, &list_documents(&ws.context_dir()), PDF_MIME).await;
    Ok(())
}

async fn run_analyze(ws: &Workspace, run_id: Option<String>) -> Result<()> {
    let client = gemini_client()?;
    let cache = UploadCache::load(&ws.upload_cache_path()).await;
    let mut manager = UploadManager::new(&client, cache);

    let videos = list_videos(&ws.video_dir());
    if videos.is_empty() {
        bail!("No videos found in {}", ws.video_dir().display());
    }

    println!("{} Checking uploads...", style("✓").green().bold());
    upload_all(&mut manager, &videos, VIDEO_MIME).await;
    let context = upload_all(&mut manager, &list_documents(&ws.context_dir()), PDF_MIME).await;
    let focus = load_focus(&ws.focus_path()).await;

    let run = RunManager::open(ws, run_id).await?;
    println!(
        "{} Run {} {}",
        style("✓").green().bold(),
        style(run.run_id()).cyan(),
        style(run.results_dir().display()).dim()
    );
    println!("{}", style("─".repeat(60)).dim());

    let total_start = Instant::now();
    let processed = run.processed_files().await;
    let mut analyzed = 0usize;

    for video in &videos {
        let filename = file_label(video);
        if processed.contains(&filename) {
            println!(
                "{} {} {}",
                style("✓").green().bold(),
                filename,
                style("(already analyzed)").dim()
            );
            continue;
        }

        let Some(remote) = manager.upload_cached(video, VIDEO_MIME).await else {
            println!(
                "{} {} {}",
                style("✗").red().bold(),
                filename,
                style("not available on server").red()
            );
            continue;
        };

        let step_start = Instant::now();
        let spinner = create_spinner(&format!("Analyzing {} with {}...", filename, client.model()));
        match analyze_video(&client, &remote, &context, &filename, &run, focus.as_deref()).await {
            Ok(record) => {
                let saved = run.save_result(&record).await?;
                let note = if record.error.is_some() {
                    style("unparseable answer kept".to_string()).yellow()
                } else {
                    style(format!("{} clips", record.clips.len())).dim()
                };
                spinner.finish_with_message(format!(
                    "{} {} {} {} {}",
                    style("✓").green().bold(),
                    filename,
                    note,
                    style(saved.display()).dim(),
                    style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
                ));
                analyzed += 1;
            }
            Err(e) => {
                tracing::error!("Failed to analyze {}: {}", filename, e);
                spinner.finish_with_message(format!(
                    "{} {} {}",
                    style("✗").red().bold(),
                    filename,
                    style(e.to_string()).red()
                ));
            }
        }
    }

    println!("{}", style("─".repeat(60)).dim());
    println!(
        "\n{} {} analyzed in {}\n",
        style(format!("Run {} complete:", run.run_id())).dim(),
        analyzed,
        style(format_duration(total_start.elapsed())).cyan().bold()
    );
    Ok(())
}

async fn run_clips(ws: &Workspace, run: Option<String>) -> Result<()> {
    let mut log = ProcessLog::open(&ws.process_log_path()).with_context(|| {
        format!(
            "cannot open process log {}",
            ws.process_log_path().display()
        )
    })?;
    let probe = Ffprobe;
    let transcoder = Ffmpeg;
    let mut extractor = ClipExtractor::new(&probe, &transcoder, ws.video_dir());

    let total_start = Instant::now();
    let spinner = create_spinner("Cutting clips...");
    let batch = match run {
        Some(run_id) => {
            let report = extractor
                .process_run(
                    &run_id,
                    &ws.run_results_dir(&run_id),
                    &ws.run_clips_dir(&run_id),
                    &mut log,
                )
                .await;
            BatchReport {
                runs: vec![RunStatus::Processed(report)],
            }
        }
        None => {
            extractor
                .process_all(&ws.results_root(), &ws.clips_root(), &mut log)
                .await
        }
    };
    spinner.finish_with_message(format!(
        "{} Clips done: {} runs processed, {} already done {}",
        style("✓").green().bold(),
        batch.processed().count(),
        batch.already_processed(),
        style(format!("[{}]", format_duration(total_start.elapsed()))).dim()
    ));

    println!("{}", style("─".repeat(60)).dim());
    println!("{}", format_batch_report(&batch));
    println!(
        "{} {}",
        style("Log:").dim(),
        style(ws.process_log_path().display()).cyan()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ws = Workspace::new(expand_home(&cli.base_dir));

    println!(
        "\n{}  {}\n",
        style("exhibit").cyan().bold(),
        style("Evidence Clip Builder").dim()
    );

    let result = match cli.command {
        Command::Upload { list, force } => run_upload(&ws, list, force).await,
        Command::Analyze { run_id } => run_analyze(&ws, run_id).await,
        Command::Clips { run } => run_clips(&ws, run).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn tilde_expands_to_home() {
        assert_eq!(expand_home("/srv/case"), PathBuf::from("/srv/case"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/case"), home.join("case"));
        }
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["exhibit", "--base-dir", "/srv/case", "clips", "--run", "run_1"])
            .unwrap();
        assert_eq!(cli.base_dir, "/srv/case");
        assert!(matches!(cli.command, Command::Clips { run: Some(ref id) } if id == "run_1"));

        let cli = Cli::try_parse_from(["exhibit", "upload", "--force", "video/a.mp4", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(
            matches!(cli.command, Command::Upload { list: false, ref force } if force == &[PathBuf::from("video/a.mp4")])
        );
    }
}
