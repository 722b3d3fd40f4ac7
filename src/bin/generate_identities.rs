use anyhow::{Context, Result};
use clap::Parser;
use ethers::signers::{LocalWallet, Signer};
use log::info;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use zkp_anon_greeter::{
    ethereum::identity_from_wallet, merkle::DEFAULT_TREE_DEPTH, types::CommitmentList,
    MembershipTree,
};

/// Creates test members: fresh wallets, their signature-derived identities
/// and the published commitment list.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 16)]
    count: usize,

    #[arg(short, long, default_value_t = DEFAULT_TREE_DEPTH)]
    depth: usize,

    #[arg(long, default_value = "commitments.json")]
    commitments: PathBuf,

    /// One `address private_key` line per member, in leaf order.
    #[arg(long, default_value = "test_keys.txt")]
    keys: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut tree = MembershipTree::new(args.depth).context("Invalid tree depth")?;
    if args.count as u64 > tree.capacity() {
        return Err(anyhow::anyhow!(
            "Cannot register {} members in a depth-{} tree (capacity {})",
            args.count,
            args.depth,
            tree.capacity()
        ));
    }

    println!("Generating {} identities...", args.count);
    let mut keys = File::create(&args.keys)
        .with_context(|| format!("Failed to create key file: {}", args.keys.display()))?;

    for _ in 0..args.count {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let identity = identity_from_wallet(&wallet)?;
        let index = tree
            .insert(identity.commitment())
            .context("Failed to register commitment")?;
        writeln!(
            keys,
            "{:?} 0x{}",
            wallet.address(),
            hex::encode(wallet.signer().to_bytes())
        )
        .context("Failed to write key file")?;
        info!("Member {} commitment {}", index, identity.commitment());
    }

    CommitmentList::from_tree(&tree).save(&args.commitments)?;

    println!(
        "Wrote {} commitments to {}",
        tree.len(),
        args.commitments.display()
    );
    println!("Wrote member keys to {}", args.keys.display());
    println!("Group root: {}", zkp_anon_greeter::utils::field_to_hex(tree.root()));

    Ok(())
}
