use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pasta_curves::pallas;
use std::sync::Arc;
use zkp_anon_greeter::{
    proof::{external_nullifier, Statement},
    Commitment, Halo2Backend, Identity, InMemoryRegistry, MembershipTree, ProofGenerator,
    ProofSystem, Verifier,
};

const SCOPE: &str = "greet-v1";

fn commitments(count: u64) -> Vec<Commitment> {
    (0..count)
        .map(|i| Commitment(pallas::Base::from(i + 1)))
        .collect()
}

fn member_tree(depth: usize, identity: &Identity) -> MembershipTree {
    let mut tree = MembershipTree::new(depth).unwrap();
    tree.insert(identity.commitment()).unwrap();
    for commitment in commitments(7) {
        tree.insert(commitment).unwrap();
    }
    tree
}

fn bench_proof_generation(c: &mut Criterion) {
    let identity = Identity::derive(b"bench member").unwrap();
    let mut group = c.benchmark_group("proof_generation");
    group.sample_size(10);

    for depth in [4usize, 10, 20] {
        let tree = member_tree(depth, &identity);
        let membership = tree.prove_membership(0).unwrap();
        let generator = ProofGenerator::new(Arc::new(Halo2Backend::setup(depth).unwrap()), SCOPE);

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| black_box(generator.generate(&identity, &membership, b"hello").unwrap()))
        });
    }

    group.finish();
}

fn bench_proof_verification(c: &mut Criterion) {
    let identity = Identity::derive(b"bench member").unwrap();
    let tree = member_tree(10, &identity);
    let backend = Arc::new(Halo2Backend::setup(10).unwrap());
    let (proof, signals) = ProofGenerator::new(backend.clone(), SCOPE)
        .generate(&identity, &tree.prove_membership(0).unwrap(), b"hello")
        .unwrap();
    let statement = Statement::new(&signals, external_nullifier(SCOPE));

    c.bench_function("proof_verification", |b| {
        b.iter(|| black_box(backend.verify(&proof, &statement)))
    });

    // Full state machine; every iteration after the first stops at the
    // spent-nullifier check.
    let verifier = Verifier::new(backend, Arc::new(InMemoryRegistry::new()), SCOPE);
    c.bench_function("verifier_replay_rejection", |b| {
        b.iter(|| black_box(verifier.verify(&proof, &signals, b"hello", tree.root()).unwrap()))
    });
}

fn bench_tree_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_insertion");

    for leaf_count in [16u64, 256, 1024] {
        let leaves = commitments(leaf_count);
        group.bench_with_input(
            BenchmarkId::from_parameter(leaf_count),
            &leaf_count,
            |b, _| {
                b.iter(|| {
                    black_box(MembershipTree::from_commitments(20, black_box(&leaves)).unwrap())
                })
            },
        );
    }

    group.finish();
}

fn bench_membership_proof(c: &mut Criterion) {
    let tree = MembershipTree::from_commitments(20, &commitments(1024)).unwrap();
    c.bench_function("membership_proof_depth_20", |b| {
        b.iter(|| black_box(tree.prove_membership(black_box(513)).unwrap()))
    });
}

fn bench_identity_derivation(c: &mut Criterion) {
    c.bench_function("identity_derivation", |b| {
        b.iter(|| black_box(Identity::derive(black_box(b"bench secret")).unwrap()))
    });
}

fn bench_poseidon_hash(c: &mut Criterion) {
    c.bench_function("poseidon_hash", |b| {
        b.iter(|| {
            black_box(zkp_anon_greeter::utils::poseidon_hash(
                black_box(pallas::Base::from(42)),
                black_box(pallas::Base::from(99)),
            ))
        })
    });
}

criterion_group!(
    benches,
    bench_proof_generation,
    bench_proof_verification,
    bench_tree_insertion,
    bench_membership_proof,
    bench_identity_derivation,
    bench_poseidon_hash
);
criterion_main!(benches);
