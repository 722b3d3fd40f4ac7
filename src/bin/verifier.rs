use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::Arc;
use zkp_anon_greeter::{
    config::Config,
    types::{CommitmentList, TimestampWindow},
    utils::field_to_hex,
    FileRegistry, Halo2Backend, NullifierRegistry, Submission, Verdict, Verifier,
};

fn env_override<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Verifies a greeting submission and records its nullifier.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    submission: PathBuf,

    #[arg(short, long)]
    commitments: Option<PathBuf>,

    #[arg(short, long)]
    nullifier_file: Option<PathBuf>,

    #[arg(long)]
    scope: Option<String>,

    #[arg(long, env = "ZKP_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args
        .config
        .as_ref()
        .map(Config::load_from_file)
        .transpose()?
        .unwrap_or_default();

    let max_proof_file_size = env_override("ZKP_MAX_PROOF_FILE_SIZE", config.proof.max_file_size);
    let max_zk_proof_size = env_override("ZKP_MAX_ZK_PROOF_SIZE", config.proof.max_zk_proof_size);
    let scope = args.scope.clone().unwrap_or_else(|| config.group.scope.clone());
    let commitments_path = args
        .commitments
        .clone()
        .unwrap_or_else(|| config.tree.commitments_file.clone());
    let nullifier_path = args
        .nullifier_file
        .clone()
        .unwrap_or_else(|| config.registry.nullifier_file.clone());

    info!("Loading submission from: {}", args.submission.display());
    println!("Loading submission from: {}", args.submission.display());
    let submission = Submission::load(&args.submission, max_proof_file_size)?;

    let window = TimestampWindow {
        tolerance_secs: config.security.timestamp_tolerance_secs,
        max_age_secs: config.security.timestamp_max_age_secs,
    };
    submission
        .validate(window, max_zk_proof_size)
        .context("Submission validation failed. The submission is malformed or expired.")?;
    info!("Submission validation passed");

    let (proof, signals) = submission.decode()?;
    println!("Submission details:");
    println!("  Greeting: {}", submission.signal);
    println!("  Root: {}", submission.root);
    println!("  Nullifier hash: {}", submission.nullifier_hash);
    println!("  Timestamp: {}", submission.timestamp);
    println!("  ZK Proof Size: {} bytes", proof.len());

    let list = CommitmentList::load(&commitments_path, config.tree.max_file_size)?;
    let group = list.build_group(config.group.root_history_size)?;
    debug!("Group root: {}", field_to_hex(group.root()));

    println!("Generating verification keys for depth {}...", group.depth());
    let backend =
        Arc::new(Halo2Backend::setup(group.depth()).context("Failed to set up verifier")?);
    let registry = Arc::new(
        FileRegistry::open(&nullifier_path).with_context(|| {
            format!("Failed to open nullifier file: {}", nullifier_path.display())
        })?,
    );
    debug!("{} nullifiers already spent", registry.len());

    let verifier = Verifier::new(backend, registry, &scope);
    println!("Verifying ZK proof in scope '{scope}'...");
    let verdict = verifier
        .verify_with_history(
            &proof,
            &signals,
            submission.signal.as_bytes(),
            &group.root_history(),
        )
        .context("Failed to record nullifier")?;

    match verdict {
        Verdict::Accepted(acceptance) => {
            println!("\n✓ Greeting ACCEPTED: {}", acceptance.signal_text());
            println!("Nullifier recorded to: {}", nullifier_path.display());
            Ok(())
        }
        Verdict::Rejected(reason) => {
            error!("Submission rejected: {reason:?}");
            println!("\n✗ Greeting REJECTED: {reason}");
            Err(anyhow::anyhow!("Submission rejected: {reason}"))
        }
    }
}
