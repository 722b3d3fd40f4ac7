use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use zkp_anon_greeter::{
    config::Config, ethereum::identity_from_private_key, types::CommitmentList,
    utils::field_to_hex, Halo2Backend, Identity, ProofGenerator, Submission,
};

/// Proves group membership and binds a greeting to the proof.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("member").required(true).args(["private_key", "secret"])))]
struct Args {
    #[arg(short, long)]
    commitments: Option<PathBuf>,

    /// Wallet key whose identity-message signature is the identity secret.
    #[arg(short, long)]
    private_key: Option<String>,

    /// Raw identity secret, for members without a wallet.
    #[arg(long)]
    secret: Option<String>,

    #[arg(short, long)]
    greeting: String,

    #[arg(long)]
    scope: Option<String>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, env = "ZKP_CONFIG")]
    config: Option<PathBuf>,
}

fn load_identity(args: &Args) -> Result<Identity> {
    match (&args.private_key, &args.secret) {
        (Some(key), _) => identity_from_private_key(key),
        (None, Some(secret)) => {
            Identity::derive(secret.as_bytes()).context("Failed to derive identity from secret")
        }
        (None, None) => Err(anyhow::anyhow!("Either --private-key or --secret is required")),
    }
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

    let commitments_path = args
        .commitments
        .clone()
        .unwrap_or_else(|| config.tree.commitments_file.clone());
    let scope = args.scope.clone().unwrap_or_else(|| config.group.scope.clone());
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.proof.output_file.clone());

    println!("Loading commitments from: {}", commitments_path.display());
    let list = CommitmentList::load(&commitments_path, config.tree.max_file_size)?;
    let tree = list.build_tree()?;
    println!(
        "Loaded {} commitments, depth {}, root {}",
        tree.len(),
        tree.depth(),
        field_to_hex(tree.root())
    );

    let identity = load_identity(&args)?;
    let commitment = identity.commitment();
    println!("Identity commitment: {commitment}");

    let leaf_index = tree.index_of(&commitment).with_context(|| {
        format!(
            "Commitment {} not found in '{}'. Make sure the identity is registered in the group.",
            commitment,
            commitments_path.display()
        )
    })?;
    info!("Found identity at leaf {leaf_index}");

    let membership = tree
        .prove_membership(leaf_index)
        .context("Failed to generate membership proof")?;
    debug!("Membership proof: {membership}");

    println!("Generating proving keys for depth {}...", tree.depth());
    let backend = Arc::new(Halo2Backend::setup(tree.depth()).context("Failed to set up prover")?);
    let generator = ProofGenerator::new(backend, &scope);

    println!("Generating ZK proof (this may take a while)...");
    let (proof, signals) = generator
        .generate(&identity, &membership, args.greeting.as_bytes())
        .context("Failed to create proof")?;
    println!("ZK proof generated, size: {} bytes", proof.len());

    let submission = Submission::new(&args.greeting, &proof, &signals)?;
    submission.save(&output)?;

    println!("Submission written to: {}", output.display());
    println!("Scope: {scope}");
    println!("Root: {}", submission.root);
    println!("Nullifier hash: {}", submission.nullifier_hash);

    Ok(())
}
