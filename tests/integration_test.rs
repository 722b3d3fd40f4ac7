use ethers::signers::LocalWallet;
use pasta_curves::pallas;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::thread;
use tempfile::TempDir;
use zkp_anon_greeter::{
    ethereum::identity_from_wallet,
    types::{CommitmentList, TimestampWindow},
    FileRegistry, Group, Halo2Backend, Identity, InMemoryRegistry, MembershipTree,
    NullifierRegistry, ProofGenerator, PublicSignals, Rejection, Submission, TreeError, Verdict,
    Verifier, ZkProof,
};

const DEPTH: usize = 2;
const SCOPE: &str = "greet-v1";

fn backend() -> Arc<Halo2Backend> {
    static BACKEND: OnceLock<Arc<Halo2Backend>> = OnceLock::new();
    BACKEND
        .get_or_init(|| Arc::new(Halo2Backend::setup(DEPTH).expect("keygen failed")))
        .clone()
}

fn members() -> Vec<Identity> {
    (0..3)
        .map(|i| Identity::derive(format!("integration member {i}").as_bytes()).unwrap())
        .collect()
}

fn tree_of(identities: &[Identity]) -> MembershipTree {
    let commitments: Vec<_> = identities.iter().map(Identity::commitment).collect();
    MembershipTree::from_commitments(DEPTH, &commitments).unwrap()
}

fn prove(
    tree: &MembershipTree,
    identity: &Identity,
    scope: &str,
    greeting: &[u8],
) -> (ZkProof, PublicSignals) {
    let index = tree.index_of(&identity.commitment()).unwrap();
    let membership = tree.prove_membership(index).unwrap();
    ProofGenerator::new(backend(), scope)
        .generate(identity, &membership, greeting)
        .unwrap()
}

fn fresh_verifier() -> Verifier<Halo2Backend, InMemoryRegistry> {
    Verifier::new(backend(), Arc::new(InMemoryRegistry::new()), SCOPE)
}

#[test]
fn test_accept_then_reject_resubmission() {
    let ids = members();
    let tree = tree_of(&ids);
    let (proof, signals) = prove(&tree, &ids[1], SCOPE, b"hello");
    let verifier = fresh_verifier();

    let verdict = verifier
        .verify(&proof, &signals, b"hello", tree.root())
        .unwrap();
    assert!(verdict.is_accepted(), "expected acceptance, got {verdict:?}");
    assert!(verifier.registry().is_spent(&signals.nullifier_hash));

    let verdict = verifier
        .verify(&proof, &signals, b"hello", tree.root())
        .unwrap();
    assert_eq!(verdict, Verdict::Rejected(Rejection::NullifierAlreadySpent));
}

#[test]
fn test_second_greeting_from_same_member_is_spent() {
    let ids = members();
    let tree = tree_of(&ids);
    let verifier = fresh_verifier();

    let (proof, signals) = prove(&tree, &ids[0], SCOPE, b"first");
    assert!(verifier
        .verify(&proof, &signals, b"first", tree.root())
        .unwrap()
        .is_accepted());

    let (proof, signals) = prove(&tree, &ids[0], SCOPE, b"second");
    assert_eq!(
        verifier
            .verify(&proof, &signals, b"second", tree.root())
            .unwrap(),
        Verdict::Rejected(Rejection::NullifierAlreadySpent)
    );
}

#[test]
fn test_swapped_greeting_is_invalid_proof() {
    let ids = members();
    let tree = tree_of(&ids);
    let (proof, signals) = prove(&tree, &ids[2], SCOPE, b"hello");
    let verifier = fresh_verifier();

    let forged = PublicSignals::for_signal(signals.root, signals.nullifier_hash, b"goodbye");
    let verdict = verifier
        .verify(&proof, &forged, b"goodbye", tree.root())
        .unwrap();
    assert_eq!(verdict, Verdict::Rejected(Rejection::InvalidProof));
    assert!(!verifier.registry().is_spent(&signals.nullifier_hash));
}

#[test]
fn test_tampered_proof_bytes_are_invalid() {
    let ids = members();
    let tree = tree_of(&ids);
    let (mut proof, signals) = prove(&tree, &ids[0], SCOPE, b"hello");
    let mid = proof.len() / 2;
    proof.0[mid] ^= 0x01;

    assert_eq!(
        fresh_verifier()
            .verify(&proof, &signals, b"hello", tree.root())
            .unwrap(),
        Verdict::Rejected(Rejection::InvalidProof)
    );
}

#[test]
fn test_foreign_scope_is_invalid_proof() {
    let ids = members();
    let tree = tree_of(&ids);
    let (proof, signals) = prove(&tree, &ids[0], "greet-v2", b"hello");

    assert_eq!(
        fresh_verifier()
            .verify(&proof, &signals, b"hello", tree.root())
            .unwrap(),
        Verdict::Rejected(Rejection::InvalidProof)
    );
}

#[test]
fn test_root_moves_after_registration() {
    let ids = members();
    let group = Group::from_tree(tree_of(&ids[..2]), 1);
    let snapshot = group.snapshot();
    let (proof, signals) = prove(&snapshot, &ids[0], SCOPE, b"hello");

    group.register(ids[2].commitment()).unwrap();

    let verifier = fresh_verifier();
    assert_eq!(
        verifier
            .verify_with_history(&proof, &signals, b"hello", &group.root_history())
            .unwrap(),
        Verdict::Rejected(Rejection::StaleOrUnknownRoot)
    );

    let tolerant = Group::from_tree(snapshot, 2);
    tolerant.register(ids[2].commitment()).unwrap();
    assert!(verifier
        .verify_with_history(&proof, &signals, b"hello", &tolerant.root_history())
        .unwrap()
        .is_accepted());
}

#[test]
fn test_published_list_keeps_previous_root_in_window() {
    let ids = members();
    let before = tree_of(&ids[..2]);
    let (proof, signals) = prove(&before, &ids[1], SCOPE, b"late");

    let list = CommitmentList::from_tree(&tree_of(&ids));
    let verifier = fresh_verifier();
    let strict = list.build_group(1).unwrap();
    assert_eq!(
        verifier
            .verify_with_history(&proof, &signals, b"late", &strict.root_history())
            .unwrap(),
        Verdict::Rejected(Rejection::StaleOrUnknownRoot)
    );

    let group = list.build_group(2).unwrap();
    assert!(verifier
        .verify_with_history(&proof, &signals, b"late", &group.root_history())
        .unwrap()
        .is_accepted());
}

#[test]
fn test_concurrent_duplicate_submissions_accept_exactly_one() {
    let ids = members();
    let tree = tree_of(&ids);
    let (proof, signals) = prove(&tree, &ids[1], SCOPE, b"race");
    let verifier = Arc::new(fresh_verifier());
    let root = tree.root();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let verifier = Arc::clone(&verifier);
            let proof = proof.clone();
            thread::spawn(move || verifier.verify(&proof, &signals, b"race", root).unwrap())
        })
        .collect();
    let verdicts: Vec<Verdict> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let accepted = verdicts.iter().filter(|v| v.is_accepted()).count();
    assert_eq!(accepted, 1);
    assert!(verdicts
        .iter()
        .filter(|v| !v.is_accepted())
        .all(|v| v.rejection() == Some(Rejection::NullifierAlreadySpent)));
}

#[test]
fn test_concurrent_distinct_members_all_accepted() {
    let ids = members();
    let tree = tree_of(&ids);
    let verifier = Arc::new(fresh_verifier());
    let root = tree.root();

    let handles: Vec<_> = ids
        .iter()
        .map(|id| {
            let (proof, signals) = prove(&tree, id, SCOPE, b"gm");
            let verifier = Arc::clone(&verifier);
            thread::spawn(move || verifier.verify(&proof, &signals, b"gm", root).unwrap())
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_accepted());
    }
    assert_eq!(verifier.registry().len(), ids.len());
}

#[test]
fn test_file_registry_survives_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("nullifiers.txt");
    let ids = members();
    let tree = tree_of(&ids);
    let (proof, signals) = prove(&tree, &ids[2], SCOPE, b"persist");

    {
        let verifier = Verifier::new(backend(), Arc::new(FileRegistry::open(&path).unwrap()), SCOPE);
        assert!(verifier
            .verify(&proof, &signals, b"persist", tree.root())
            .unwrap()
            .is_accepted());
    }

    let verifier = Verifier::new(backend(), Arc::new(FileRegistry::open(&path).unwrap()), SCOPE);
    assert_eq!(
        verifier
            .verify(&proof, &signals, b"persist", tree.root())
            .unwrap(),
        Verdict::Rejected(Rejection::NullifierAlreadySpent)
    );
}

#[test]
fn test_file_registries_sharing_a_path_accept_once() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("nullifiers.txt");
    let ids = members();
    let tree = tree_of(&ids);
    let (proof, signals) = prove(&tree, &ids[0], SCOPE, b"shared");
    let root = tree.root();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::new(FileRegistry::open(&path).unwrap());
            let verifier = Verifier::new(backend(), registry, SCOPE);
            let proof = proof.clone();
            thread::spawn(move || verifier.verify(&proof, &signals, b"shared", root).unwrap())
        })
        .collect();
    let accepted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(Verdict::is_accepted)
        .count();
    assert_eq!(accepted, 1);

    let reopened = FileRegistry::open(&path).unwrap();
    assert_eq!(reopened.len(), 1);
    assert!(reopened.is_spent(&signals.nullifier_hash));
}

#[test]
fn test_submission_file_round_trip_verifies() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("submission.json");
    let ids = members();
    let tree = tree_of(&ids);
    let (proof, signals) = prove(&tree, &ids[0], SCOPE, "héllo wörld".as_bytes());

    Submission::new("héllo wörld", &proof, &signals)
        .unwrap()
        .save(&path)
        .unwrap();

    let loaded = Submission::load(&path, 1024 * 1024).unwrap();
    loaded.validate(TimestampWindow::default(), 512 * 1024).unwrap();
    let (proof, signals) = loaded.decode().unwrap();
    let verdict = fresh_verifier()
        .verify(&proof, &signals, loaded.signal.as_bytes(), tree.root())
        .unwrap();
    match verdict {
        Verdict::Accepted(acceptance) => assert_eq!(acceptance.signal_text(), "héllo wörld"),
        Verdict::Rejected(reason) => panic!("unexpected rejection: {reason}"),
    }
}

#[test]
fn test_tree_capacity_and_index_errors() {
    let ids: Vec<Identity> = (0..5)
        .map(|i| Identity::derive(format!("capacity member {i}").as_bytes()).unwrap())
        .collect();
    let mut tree = MembershipTree::new(DEPTH).unwrap();
    for id in &ids[..4] {
        tree.insert(id.commitment()).unwrap();
    }
    assert_eq!(
        tree.insert(ids[4].commitment()),
        Err(TreeError::TreeFull { capacity: 4 })
    );

    let partial = tree_of(&members());
    assert_eq!(
        partial.prove_membership(3).unwrap_err(),
        TreeError::IndexOutOfRange { index: 3, size: 3 }
    );
}

#[test]
fn test_wallet_identity_proves_membership() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let identity = identity_from_wallet(&wallet).unwrap();
    let mut ids = members();
    ids.truncate(2);
    ids.push(identity_from_wallet(&wallet).unwrap());
    let tree = tree_of(&ids);

    let (proof, signals) = prove(&tree, &identity, SCOPE, b"signed in");
    assert!(fresh_verifier()
        .verify(&proof, &signals, b"signed in", tree.root())
        .unwrap()
        .is_accepted());
    assert_ne!(tree.root(), pallas::Base::zero());
}

#[test]
fn test_end_to_end_prover_verifier_binaries() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let commitments_file = temp_dir.path().join("commitments.json");
    let submission_file = temp_dir.path().join("submission.json");
    let nullifier_file = temp_dir.path().join("nullifiers.txt");

    let prover_path = PathBuf::from("./target/release/prover");
    let verifier_path = PathBuf::from("./target/release/verifier");

    if !prover_path.exists() || !verifier_path.exists() {
        eprintln!("Skipping binary test: release binaries not found");
        return;
    }

    let wallets: Vec<LocalWallet> = (0..3)
        .map(|_| LocalWallet::new(&mut rand::thread_rng()))
        .collect();
    let mut tree = MembershipTree::new(DEPTH).unwrap();
    for wallet in &wallets {
        tree.insert(identity_from_wallet(wallet).unwrap().commitment())
            .unwrap();
    }
    CommitmentList::from_tree(&tree)
        .save(&commitments_file)
        .unwrap();

    let private_key_hex = format!("{:x}", wallets[1].signer().to_bytes());
    let prover_output = std::process::Command::new(&prover_path)
        .arg("--commitments")
        .arg(&commitments_file)
        .arg("--private-key")
        .arg(&private_key_hex)
        .arg("--greeting")
        .arg("hello from the binaries")
        .arg("--output")
        .arg(&submission_file)
        .output()
        .expect("Failed to execute prover");
    assert!(
        prover_output.status.success(),
        "Prover failed: {}",
        String::from_utf8_lossy(&prover_output.stderr)
    );
    assert!(fs::metadata(&submission_file).is_ok());

    let run_verifier = || {
        std::process::Command::new(&verifier_path)
            .arg("--submission")
            .arg(&submission_file)
            .arg("--commitments")
            .arg(&commitments_file)
            .arg("--nullifier-file")
            .arg(&nullifier_file)
            .output()
            .expect("Failed to execute verifier")
    };

    let first = run_verifier();
    assert!(
        first.status.success(),
        "Verifier failed: {}",
        String::from_utf8_lossy(&first.stderr)
    );
    assert!(String::from_utf8_lossy(&first.stdout).contains("ACCEPTED"));

    let replay = run_verifier();
    assert!(!replay.status.success());
    assert!(String::from_utf8_lossy(&replay.stdout)
        .contains(&Rejection::NullifierAlreadySpent.to_string()));
}
