use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::warn;

use updelta::remote::chain_for;
use updelta::{
    apply_chain, apply_patch, create_patch, install, PatchServer, ProgressObserver, Stage,
    Version, DEFAULT_LINK_PATTERN,
};

#[derive(Parser)]
#[command(name = "updelta", about = "Directory delta patch creator and applier")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (can be repeated for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a patch by comparing old and new directories
    Create {
        /// Path to the old (original) directory
        #[arg(long)]
        old: PathBuf,
        /// Path to the new (updated) directory
        #[arg(long)]
        new: PathBuf,
        /// Output path for the patch file
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Apply a patch to an old directory, writing the result to a new one
    Apply {
        /// Path to the directory the patch was created from
        #[arg(long)]
        old: PathBuf,
        /// Empty or missing directory receiving the patched tree
        #[arg(long)]
        dest: PathBuf,
        /// Path to the patch file
        #[arg(long, short)]
        patch: PathBuf,
    },
    /// List the patch chains published on an index page
    Groups {
        /// URL of the index page (http, https or file)
        #[arg(long)]
        url: String,
        /// Regex with `from` and `to` named groups matched against link file names
        #[arg(long, default_value = DEFAULT_LINK_PATTERN)]
        pattern: String,
    },
    /// Download and apply the chain starting at the current version
    Update {
        /// URL of the index page (http, https or file)
        #[arg(long)]
        url: String,
        /// Version installed in the target directory
        #[arg(long)]
        current: String,
        /// Installed directory, replaced by the updated tree
        #[arg(long)]
        target: PathBuf,
        /// Regex with `from` and `to` named groups matched against link file names
        #[arg(long, default_value = DEFAULT_LINK_PATTERN)]
        pattern: String,
        /// Where to store downloaded patches (a temporary directory by default)
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
}

/// Prints stage headers and a running counter to stderr.
#[derive(Default)]
struct ConsoleProgress {
    total: usize,
}

impl ProgressObserver for ConsoleProgress {
    fn on_archive(&mut self, index: usize, total: usize, archive: &Path) {
        eprintln!("[{}/{total}] {}", index + 1, archive.display());
    }

    fn on_stage(&mut self, stage: Stage, total: usize) {
        self.total = total;
        eprintln!("  {stage}: {total} items");
    }

    fn on_progress(&mut self, index: usize) {
        eprint!("\r  {index}/{}", self.total);
        if index == self.total {
            eprintln!();
        }
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Create { old, new, output } => {
            println!("Creating patch...");
            println!("  Old: {}", old.display());
            println!("  New: {}", new.display());
            println!("  Output: {}", output.display());

            let start = Instant::now();
            let target = output.clone();
            let summary = tokio::task::spawn_blocking(move || create_patch(&old, &new, &output))
                .await?
                .with_context(|| format!("failed to create {}", target.display()))?;
            let elapsed = start.elapsed();

            println!("\nPatch created successfully!");
            println!("  Files patched: {}", summary.files_patched);
            println!("  New files: {}", summary.plain_files);
            println!("  New directories: {}", summary.plain_dirs);
            println!("  Directories skipped: {}", summary.dirs_skipped);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Apply { old, dest, patch } => {
            if dir_has_entries(&dest)? {
                bail!("destination {} is not empty", dest.display());
            }
            println!("Applying patch...");
            println!("  Old: {}", old.display());
            println!("  Destination: {}", dest.display());
            println!("  Patch: {}", patch.display());

            let start = Instant::now();
            let source = patch.clone();
            let summary = tokio::task::spawn_blocking(move || {
                apply_patch(&patch, &old, &dest, &mut ConsoleProgress::default())
            })
            .await?
            .with_context(|| format!("failed to apply {}", source.display()))?;
            let elapsed = start.elapsed();

            println!("\nPatch applied successfully!");
            println!("  Files patched: {}", summary.files_patched);
            println!("  Files copied: {}", summary.files_copied);
            println!("  New files: {}", summary.plain_files);
            println!("  New directories: {}", summary.plain_dirs);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Groups { url, pattern } => {
            let groups = PatchServer::new()
                .find_patch_groups(&url, &pattern)
                .await
                .with_context(|| format!("failed to read patch index {url}"))?;
            if groups.is_empty() {
                println!("No patches found at {url}");
            }
            for (start, chain) in &groups {
                let steps: Vec<String> = chain.iter().map(|link| link.to.to_string()).collect();
                println!("{start} -> {}", steps.join(" -> "));
            }
        }
        Commands::Update {
            url,
            current,
            target,
            pattern,
            download_dir,
        } => {
            let current = Version::parse(&current).context("invalid --current version")?;
            let server = PatchServer::new();
            let groups = server
                .find_patch_groups(&url, &pattern)
                .await
                .with_context(|| format!("failed to read patch index {url}"))?;

            let chain = chain_for(&groups, &current);
            let Some(last) = chain.last() else {
                println!("no update available for {current}");
                return Ok(());
            };
            println!("Updating {current} -> {} ({} patches)", last.to, chain.len());

            let (dir, _staging) = match download_dir {
                Some(dir) => (dir, None),
                None => {
                    let staging = tempfile::tempdir().context("failed to create download directory")?;
                    (staging.path().to_path_buf(), Some(staging))
                }
            };

            let start = Instant::now();
            let archives = server
                .download_patches(chain, &dir)
                .await
                .context("failed to download patches")?;

            let base = target.clone();
            let paths = archives.clone();
            let applied = tokio::task::spawn_blocking(move || -> updelta::Result<bool> {
                match apply_chain(&paths, &base, &mut ConsoleProgress::default())? {
                    Some(result) => {
                        install(&result, &base)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
            .await?;

            for archive in &archives {
                if let Err(err) = fs::remove_file(archive) {
                    warn!("failed to remove {}: {err}", archive.display());
                }
            }

            if applied.with_context(|| format!("failed to update {}", target.display()))? {
                println!("\nUpdated {} to {}", target.display(), last.to);
                println!("  Time elapsed: {:.3}s", start.elapsed().as_secs_f64());
            }
        }
    }

    Ok(())
}

fn dir_has_entries(dir: &Path) -> anyhow::Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    let mut entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    Ok(entries.next().is_some())
}
