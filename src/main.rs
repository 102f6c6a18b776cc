//! Thin `clap` front end over the `fst` library.
//!
//! This binary is not a product-grade CLI — an interactive terminal UI,
//! agent-subprocess integration, and colorized output formatting are
//! deliberately out of scope. It exists so each core operation has one
//! obvious call site: each subcommand parses arguments, calls straight
//! into `fst`, and prints a plain-text summary.
//!
//! Exit codes: `0` success, `1` drift/conflict detected, `2` invalid usage,
//! `3` external dependency missing, other nonzero = error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fst::blob::BlobStore;
use fst::cancel::CancelToken;
use fst::drift;
use fst::gitbridge;
use fst::history;
use fst::ids::{SnapshotId, WorkspaceName};
use fst::manifest::Manifest;
use fst::project::Project;
use fst::snapshot::{Author, SnapshotStore};
use fst::workspace::{self, WorkspaceConfig, WorkspaceRegistry};

#[derive(Parser)]
#[command(name = "fst")]
#[command(version, about = "Content-addressed workspace snapshot engine")]
#[command(propagate_version = true)]
struct Cli {
    /// Project root to operate on (defaults to discovering one by walking
    /// upward from the current directory).
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new project at `--project` (defaults to the current
    /// directory).
    Init {
        /// Human-readable project name.
        #[arg(long, default_value = "project")]
        name: String,
    },

    /// Manage workspaces.
    #[command(subcommand)]
    Workspace(WorkspaceCommands),

    /// Scan a workspace and create a snapshot of its current tree.
    Snapshot {
        /// Workspace name to snapshot.
        workspace: String,
        /// Commit message.
        #[arg(short, long)]
        message: Option<String>,
        /// Agent slug, if this snapshot was produced by an automated agent.
        #[arg(long)]
        agent: Option<String>,
    },

    /// Resolve a (possibly abbreviated) snapshot-ID prefix.
    Resolve {
        /// Hex prefix, at least 6 characters.
        prefix: String,
    },

    /// Compute the three-way drift between a base snapshot and two derived
    /// snapshots.
    Drift {
        base: String,
        a: String,
        b: String,
    },

    /// Merge one workspace's head into another's working tree.
    Merge {
        /// Workspace to merge into.
        target: String,
        /// Workspace to merge from.
        source: String,
        /// Conflict policy: ours, theirs, manual (mark and continue), or
        /// agent (not wired up from the CLI; falls back to manual).
        #[arg(long, default_value = "manual")]
        policy: String,
    },

    /// Roll back a workspace's tree to a prior auto-snapshot (e.g. the one
    /// taken immediately before the last merge).
    Rollback {
        workspace: String,
        snapshot: String,
    },

    /// Rewrite history: edit a snapshot's message.
    HistoryEdit { snapshot: String, message: String },
    /// Rewrite history: drop a snapshot, splicing children onto its parent.
    HistoryDrop { snapshot: String },
    /// Rewrite history: squash a linear run of snapshots (oldest first, each
    /// the sole parent of the next) into one.
    HistorySquash {
        /// Snapshots to squash, oldest first.
        #[arg(required = true, num_args = 1..)]
        targets: Vec<String>,
        #[arg(long)]
        message: Option<String>,
    },
    /// Rewrite history: rebase a snapshot (and its descendants) onto a new
    /// parent.
    HistoryRebase { target: String, onto: String },

    /// Export every workspace's reachable history to the project's Git
    /// repository.
    GitExport {
        #[arg(long)]
        rebuild: bool,
    },
    /// Incrementally import new commits from the project's Git repository.
    GitImport,
}

#[derive(Subcommand)]
enum WorkspaceCommands {
    /// Create a brand new, empty workspace.
    Init { name: String },
    /// Fork a new workspace from another workspace's current head.
    Clone { source: String, name: String },
    /// List every workspace registered to this project.
    List,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Map a command failure to an exit code: `2` for invalid usage, `3` for a
/// missing external dependency (the `git` binary), anything else falls
/// through to a generic failure code. Walks the full `anyhow` chain since
/// `.context(...)` wraps the original `FstError` rather than replacing it.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        match cause.downcast_ref::<fst::error::FstError>() {
            Some(fst::error::FstError::InvalidInput { .. }) => return 2,
            Some(fst::error::FstError::GitFailure { missing_dependency: true, .. }) => return 3,
            _ => {}
        }
    }
    4
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn default_author() -> Author {
    Author {
        name: std::env::var("FST_AUTHOR_NAME").unwrap_or_else(|_| "fst".to_owned()),
        email: std::env::var("FST_AUTHOR_EMAIL").unwrap_or_else(|_| "fst@fastest.local".to_owned()),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("reading current directory")?;

    if let Commands::Init { name } = &cli.command {
        let root = cli.project.clone().unwrap_or(cwd);
        std::fs::create_dir_all(&root)?;
        let project = Project::new(name.clone(), now());
        project.save(&root)?;
        println!("initialized project '{name}' ({}) at {}", project.project_id, root.display());
        return Ok(ExitCode::SUCCESS);
    }

    let root = match &cli.project {
        Some(p) => p.clone(),
        None => Project::discover(&cwd).context("no fst project found; run 'fst init' first")?,
    };
    let project = Project::load(&root)?;
    let blobs = BlobStore::new(Project::blobs_dir(&root));
    let snapshots = SnapshotStore::new(Project::snapshots_dir(&root));
    let registry = WorkspaceRegistry::new(Project::workspaces_dir(&root));

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),

        Commands::Workspace(WorkspaceCommands::Init { name }) => {
            let ws_name = WorkspaceName::new(&name).map_err(fst::error::FstError::from)?;
            let ws_root = root.join(&name);
            let info = workspace::init(&registry, &project.project_id, &ws_root, &ws_name, now())?;
            println!("created workspace '{}' ({}) at {}", info.workspace_name, info.workspace_id, ws_root.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Workspace(WorkspaceCommands::Clone { source, name }) => {
            let source_info = registry.find_by_name(&source)?;
            let ws_name = WorkspaceName::new(&name).map_err(fst::error::FstError::from)?;
            let ws_root = root.join(&name);
            let info = workspace::clone_from(
                &registry, &snapshots, &blobs, &project.project_id, &source_info, &ws_root, &ws_name, now(),
            )?;
            println!("cloned '{source}' into workspace '{}' at {}", info.workspace_name, ws_root.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Workspace(WorkspaceCommands::List) => {
            let mut all = registry.list()?;
            all.sort_by(|a, b| a.workspace_name.cmp(&b.workspace_name));
            for ws in all {
                let head = ws.current_snapshot_id.as_ref().map_or("(none)", SnapshotId::as_str);
                println!("{}\t{}\t{}", ws.workspace_name, head, ws.path.display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Snapshot { workspace, message, agent } => {
            let info = registry.find_by_name(&workspace)?;
            let config = WorkspaceConfig::load(&info.path)?;
            let meta = workspace::snapshot_create(
                &registry, &snapshots, &blobs, &info.path, config, info, default_author(), message, agent, now(),
            )?;
            println!("{}", meta.id.as_str());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Resolve { prefix } => {
            let id = snapshots.resolve_prefix(&prefix)?;
            println!("{}", id.as_str());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Drift { base, a, b } => {
            let base_id = resolve(&snapshots, &base)?;
            let a_id = resolve(&snapshots, &a)?;
            let b_id = resolve(&snapshots, &b)?;
            let base_m = load_manifest(&snapshots, &blobs, &base_id)?;
            let a_m = load_manifest(&snapshots, &blobs, &a_id)?;
            let b_m = load_manifest(&snapshots, &blobs, &b_id)?;
            let classified = drift::classify(&base_m, &a_m, &b_m);
            let mut conflicted = false;
            for d in &classified {
                if d.both_changed() && !d.changes_agree() {
                    conflicted = true;
                }
                println!("{}\tside_a={:?}\tside_b={:?}", d.path, d.side_a, d.side_b);
            }
            Ok(if conflicted { ExitCode::from(1) } else { ExitCode::SUCCESS })
        }

        Commands::Merge { target, source, policy } => {
            let target_info = registry.find_by_name(&target)?;
            let source_info = registry.find_by_name(&source)?;
            let target_config = WorkspaceConfig::load(&target_info.path)?;
            let conflict_policy = match policy.as_str() {
                "ours" => workspace::ConflictPolicy::Ours,
                "theirs" => workspace::ConflictPolicy::Theirs,
                "manual" => workspace::ConflictPolicy::Manual,
                "agent" => workspace::ConflictPolicy::Agent,
                other => {
                    return Err(fst::error::FstError::InvalidInput {
                        detail: format!("unknown conflict policy '{other}' (expected ours|theirs|manual|agent)"),
                    }
                    .into())
                }
            };
            let outcome = workspace::merge_into(
                &snapshots, &blobs, &target_info.path, target_config, &source_info,
                conflict_policy, None, default_author(), now(),
            )?;
            if outcome.plan.is_clean() {
                println!("merged cleanly; pre-merge snapshot {}", outcome.pre_merge_snapshot.as_str());
                Ok(ExitCode::SUCCESS)
            } else {
                println!("merge has {} conflicting path(s); pre-merge snapshot {}", outcome.plan.conflicts.len(), outcome.pre_merge_snapshot.as_str());
                for path in &outcome.plan.conflicts {
                    println!("  conflict: {path}");
                }
                Ok(ExitCode::from(1))
            }
        }

        Commands::Rollback { workspace, snapshot } => {
            let info = registry.find_by_name(&workspace)?;
            let snap_id = resolve(&snapshots, &snapshot)?;
            workspace::rollback(&snapshots, &blobs, &info.path, &snap_id)?;
            println!("rolled back '{workspace}' to {}", snap_id.as_str());
            Ok(ExitCode::SUCCESS)
        }

        Commands::HistoryEdit { snapshot, message } => {
            let id = resolve(&snapshots, &snapshot)?;
            let (new_id, _map) = history::edit(
                &snapshots, &blobs, &id, None, Some(Some(message)), default_author(),
                |_| now(),
            )?;
            println!("{}", new_id.as_str());
            Ok(ExitCode::SUCCESS)
        }

        Commands::HistoryDrop { snapshot } => {
            let id = resolve(&snapshots, &snapshot)?;
            let author = default_author();
            let map = history::drop(&snapshots, &blobs, &id, &author, |_| now())?;
            println!("{}", map.resolve(&id).as_str());
            Ok(ExitCode::SUCCESS)
        }

        Commands::HistorySquash { targets, message } => {
            let ids = targets
                .iter()
                .map(|t| resolve(&snapshots, t))
                .collect::<Result<Vec<_>>>()?;
            let (squashed, _map) = history::squash(&snapshots, &blobs, &ids, default_author(), now(), message)?;
            println!("{}", squashed.id.as_str());
            Ok(ExitCode::SUCCESS)
        }

        Commands::HistoryRebase { target, onto } => {
            let target_id = resolve(&snapshots, &target)?;
            let onto_id = resolve(&snapshots, &onto)?;
            let resolver = fst::merge::LineResolver::default();
            let (rewritten, conflicts) =
                history::rebase_onto(&snapshots, &blobs, &target_id, &onto_id, &resolver, default_author(), now())?;
            println!("{}", rewritten.id.as_str());
            if conflicts.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                for path in &conflicts {
                    println!("  conflict: {path}");
                }
                Ok(ExitCode::from(1))
            }
        }

        Commands::GitExport { rebuild } => {
            let cancel = CancelToken::new();
            let report = gitbridge::export(&root, &project, &snapshots, &blobs, &registry, rebuild, Duration::from_secs(60), &cancel)?;
            for branch in &report.branches {
                println!("{}\t{}\t{} new commit(s)", branch.workspace_name, branch.tip_sha, branch.new_commits);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::GitImport => {
            let cancel = CancelToken::new();
            let all_workspaces = registry.list()?;
            let mut local_heads = std::collections::BTreeMap::new();
            for ws in &all_workspaces {
                local_heads.insert(ws.workspace_id.clone(), ws.current_snapshot_id.clone());
            }
            let results = gitbridge::import_incremental(&root, &snapshots, &blobs, &local_heads, Duration::from_secs(60), &cancel)?;
            let mut diverged = false;
            for result in &results {
                match &result.outcome {
                    gitbridge::ImportOutcome::UpToDate => {
                        println!("{}\tup to date", result.workspace_name);
                    }
                    gitbridge::ImportOutcome::FastForward { new_head } => {
                        println!("{}\tfast-forward to {}", result.workspace_name, new_head.as_str());
                        if let Some(ws) = all_workspaces.iter().find(|w| w.workspace_id == result.workspace_id) {
                            fast_forward_workspace(&registry, &snapshots, &blobs, ws, new_head)?;
                        }
                    }
                    gitbridge::ImportOutcome::Diverged(info) => {
                        diverged = true;
                        println!(
                            "{}\tdiverged: local={} remote={} base={:?}",
                            result.workspace_name,
                            info.local_head.as_str(),
                            info.remote_head.as_str(),
                            info.merge_base.iter().map(SnapshotId::as_str).collect::<Vec<_>>(),
                        );
                    }
                }
            }
            Ok(if diverged { ExitCode::from(1) } else { ExitCode::SUCCESS })
        }
    }
}

/// Advance `ws`'s head to `new_head` after a fast-forward import: updates
/// the project registry entry, the workspace's own config, and restores the
/// working tree to match (the same materialization `workspace::clone_from`
/// performs for a freshly forked workspace).
fn fast_forward_workspace(
    registry: &WorkspaceRegistry,
    snapshots: &SnapshotStore,
    blobs: &BlobStore,
    ws: &fst::workspace::WorkspaceInfo,
    new_head: &SnapshotId,
) -> Result<()> {
    let meta = snapshots.load(new_head)?;
    workspace::restore_snapshot_tree(blobs, &meta.manifest_hash, &ws.path)?;

    let mut config = WorkspaceConfig::load(&ws.path)?;
    config.current_snapshot_id = Some(new_head.clone());
    config.save(&ws.path)?;

    let mut info = ws.clone();
    info.current_snapshot_id = Some(new_head.clone());
    registry.put(&info)?;
    Ok(())
}

fn resolve(snapshots: &SnapshotStore, s: &str) -> Result<SnapshotId> {
    if let Ok(id) = SnapshotId::new(s) {
        return Ok(id);
    }
    Ok(snapshots.resolve_prefix(s)?)
}

fn load_manifest(snapshots: &SnapshotStore, blobs: &BlobStore, id: &SnapshotId) -> Result<Manifest> {
    let meta = snapshots.load(id)?;
    Ok(Manifest::load(blobs, &meta.manifest_hash)?)
}
