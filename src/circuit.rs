//! Halo2 circuit for anonymous group signalling, and the proving backend
//! that wraps it.
//!
//! # Statement
//!
//! Private witness: `trapdoor`, `nullifier_secret`, the Merkle siblings and
//! the path direction bits. Public instance column, row by row:
//!
//! | row | value                 |
//! |-----|-----------------------|
//! | 0   | Merkle root           |
//! | 1   | nullifier hash        |
//! | 2   | signal hash           |
//! | 3   | external nullifier    |
//!
//! Constraints:
//! 1. `leaf = Poseidon(trapdoor, nullifier_secret)`
//! 2. at every level a boolean direction bit orders `(current, sibling)`
//!    into `(left, right)` and `current' = Poseidon(left, right)`; the last
//!    `current` equals the root instance
//! 3. `Poseidon(nullifier_secret, external_nullifier)` equals the nullifier
//!    hash instance
//! 4. the signal hash is copied out of the instance column and squared, so a
//!    proof verifies only against the signal it was made for

use crate::error::{ProofError, ProofResult};
use crate::merkle::MAX_TREE_DEPTH;
use crate::proof::{ProofSystem, Statement, Witness, ZkProof};
use crate::CIRCUIT_K;
use halo2_gadgets::poseidon::{
    primitives::{ConstantLength, P128Pow5T3},
    Hash as PoseidonHash, Pow5Chip, Pow5Config,
};
use halo2_proofs::{
    circuit::{AssignedCell, Layouter, SimpleFloorPlanner, Value},
    plonk::{
        create_proof, keygen_pk, keygen_vk, verify_proof, Advice, Circuit, Column,
        ConstraintSystem, Error, Expression, Instance, ProvingKey, Selector, SingleVerifier,
    },
    poly::{commitment::Params, Rotation},
    transcript::{Blake2bRead, Blake2bWrite, Challenge255},
};
use log::{debug, info};
use pasta_curves::{pallas, vesta};
use rand::rngs::OsRng;

pub const ROOT_ROW: usize = 0;
pub const NULLIFIER_HASH_ROW: usize = 1;
pub const SIGNAL_HASH_ROW: usize = 2;
pub const EXTERNAL_NULLIFIER_ROW: usize = 3;

type Cell = AssignedCell<pallas::Base, pallas::Base>;

#[derive(Debug, Clone)]
pub struct SetMembershipConfig {
    pub advice: [Column<Advice>; 5],
    pub instance: Column<Instance>,
    pub swap: Selector,
    pub square: Selector,
    pub poseidon: Pow5Config<pallas::Base, 3, 2>,
}

#[derive(Debug, Clone)]
pub struct SetMembershipCircuit {
    pub trapdoor: Value<pallas::Base>,
    pub nullifier_secret: Value<pallas::Base>,
    pub siblings: Vec<Value<pallas::Base>>,
    /// 1 where the path node is a right child, 0 otherwise.
    pub path_bits: Vec<Value<pallas::Base>>,
}

impl SetMembershipCircuit {
    /// Circuit of the given depth with every witness unknown, for keygen.
    #[must_use]
    pub fn blank(depth: usize) -> Self {
        Self {
            trapdoor: Value::unknown(),
            nullifier_secret: Value::unknown(),
            siblings: vec![Value::unknown(); depth],
            path_bits: vec![Value::unknown(); depth],
        }
    }

    #[must_use]
    pub fn from_witness(witness: &Witness) -> Self {
        Self {
            trapdoor: Value::known(witness.trapdoor),
            nullifier_secret: Value::known(witness.nullifier_secret),
            siblings: witness.siblings.iter().copied().map(Value::known).collect(),
            path_bits: witness
                .path_directions
                .iter()
                .map(|&is_right| Value::known(pallas::Base::from(u64::from(is_right))))
                .collect(),
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

fn hash_pair(
    config: &SetMembershipConfig,
    mut layouter: impl Layouter<pallas::Base>,
    message: [Cell; 2],
) -> Result<Cell, Error> {
    let chip = Pow5Chip::construct(config.poseidon.clone());
    let hasher = PoseidonHash::<
        pallas::Base,
        Pow5Chip<pallas::Base, 3, 2>,
        P128Pow5T3,
        ConstantLength<2>,
        3,
        2,
    >::init(chip, layouter.namespace(|| "poseidon init"))?;
    hasher.hash(layouter.namespace(|| "poseidon hash"), message)
}

impl Circuit<pallas::Base> for SetMembershipCircuit {
    type Config = SetMembershipConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self {
        Self::blank(self.depth())
    }

    fn configure(meta: &mut ConstraintSystem<pallas::Base>) -> Self::Config {
        let advice = [
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(), // poseidon partial s-box
            meta.advice_column(),
        ];
        let instance = meta.instance_column();

        meta.enable_equality(instance);
        for column in &advice {
            meta.enable_equality(*column);
        }

        let rc_a = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        let rc_b = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        meta.enable_constant(rc_b[0]);
        let poseidon = Pow5Chip::<pallas::Base, 3, 2>::configure::<P128Pow5T3>(
            meta,
            [advice[0], advice[1], advice[2]],
            advice[3],
            rc_a,
            rc_b,
        );

        let swap = meta.selector();
        meta.create_gate("merkle conditional swap", |meta| {
            let s = meta.query_selector(swap);
            let current = meta.query_advice(advice[0], Rotation::cur());
            let sibling = meta.query_advice(advice[1], Rotation::cur());
            let bit = meta.query_advice(advice[2], Rotation::cur());
            let left = meta.query_advice(advice[3], Rotation::cur());
            let right = meta.query_advice(advice[4], Rotation::cur());
            let one = Expression::Constant(pallas::Base::from(1u64));

            vec![
                s.clone() * bit.clone() * (one - bit.clone()),
                s.clone()
                    * (left.clone() - current.clone() - bit * (sibling.clone() - current.clone())),
                s * (left + right - current - sibling),
            ]
        });

        let square = meta.selector();
        meta.create_gate("signal binding", |meta| {
            let s = meta.query_selector(square);
            let signal = meta.query_advice(advice[0], Rotation::cur());
            let signal_squared = meta.query_advice(advice[1], Rotation::cur());
            vec![s * (signal_squared - signal.clone() * signal)]
        });

        SetMembershipConfig {
            advice,
            instance,
            swap,
            square,
            poseidon,
        }
    }

    fn synthesize(
        &self,
        config: Self::Config,
        mut layouter: impl Layouter<pallas::Base>,
    ) -> Result<(), Error> {
        let (trapdoor, nullifier_secret) = layouter.assign_region(
            || "load identity secrets",
            |mut region| {
                let trapdoor =
                    region.assign_advice(|| "trapdoor", config.advice[0], 0, || self.trapdoor)?;
                let nullifier_secret = region.assign_advice(
                    || "nullifier secret",
                    config.advice[1],
                    0,
                    || self.nullifier_secret,
                )?;
                Ok((trapdoor, nullifier_secret))
            },
        )?;

        let mut current = hash_pair(
            &config,
            layouter.namespace(|| "identity commitment"),
            [trapdoor, nullifier_secret.clone()],
        )?;

        for (level, (sibling, bit)) in self.siblings.iter().zip(&self.path_bits).enumerate() {
            let (left, right) = layouter.assign_region(
                || format!("merkle swap {level}"),
                |mut region| {
                    config.swap.enable(&mut region, 0)?;
                    let node =
                        current.copy_advice(|| "current", &mut region, config.advice[0], 0)?;
                    region.assign_advice(|| "sibling", config.advice[1], 0, || *sibling)?;
                    region.assign_advice(|| "direction", config.advice[2], 0, || *bit)?;

                    let node_value = node.value().copied();
                    let left_value = node_value + *bit * (*sibling - node_value);
                    let right_value = node_value + *sibling - left_value;

                    let left =
                        region.assign_advice(|| "left", config.advice[3], 0, || left_value)?;
                    let right =
                        region.assign_advice(|| "right", config.advice[4], 0, || right_value)?;
                    Ok((left, right))
                },
            )?;

            current = hash_pair(
                &config,
                layouter.namespace(|| format!("merkle level {level}")),
                [left, right],
            )?;
        }
        layouter.constrain_instance(current.cell(), config.instance, ROOT_ROW)?;

        let external_nullifier = layouter.assign_region(
            || "load external nullifier",
            |mut region| {
                region.assign_advice_from_instance(
                    || "external nullifier",
                    config.instance,
                    EXTERNAL_NULLIFIER_ROW,
                    config.advice[0],
                    0,
                )
            },
        )?;
        let nullifier_hash = hash_pair(
            &config,
            layouter.namespace(|| "nullifier hash"),
            [nullifier_secret, external_nullifier],
        )?;
        layouter.constrain_instance(nullifier_hash.cell(), config.instance, NULLIFIER_HASH_ROW)?;

        layouter.assign_region(
            || "bind signal",
            |mut region| {
                config.square.enable(&mut region, 0)?;
                let signal = region.assign_advice_from_instance(
                    || "signal hash",
                    config.instance,
                    SIGNAL_HASH_ROW,
                    config.advice[0],
                    0,
                )?;
                let squared = signal.value().map(|v| *v * *v);
                region.assign_advice(|| "signal hash squared", config.advice[1], 0, || squared)?;
                Ok(())
            },
        )
    }
}

fn backend_error(context: &str, error: Error) -> ProofError {
    ProofError::Backend(format!("{context}: {error:?}"))
}

/// Halo2 (IPA over Vesta) proving backend with keys generated once for a
/// fixed tree depth.
pub struct Halo2Backend {
    depth: usize,
    params: Params<vesta::Affine>,
    pk: ProvingKey<vesta::Affine>,
}

impl Halo2Backend {
    /// Generates parameters and keys for trees of `depth` at [`CIRCUIT_K`].
    ///
    /// # Errors
    /// Returns [`ProofError::Backend`] for unsupported depths or keygen failure.
    pub fn setup(depth: usize) -> ProofResult<Self> {
        Self::setup_with_k(depth, CIRCUIT_K)
    }

    /// # Errors
    /// Same as [`Halo2Backend::setup`].
    pub fn setup_with_k(depth: usize, k: u32) -> ProofResult<Self> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(ProofError::Backend(format!(
                "unsupported circuit depth {depth}: must be between 1 and {MAX_TREE_DEPTH}"
            )));
        }

        info!("Generating halo2 parameters and keys (k={k}, depth={depth})");
        let params = Params::<vesta::Affine>::new(k);
        let circuit = SetMembershipCircuit::blank(depth);
        let vk = keygen_vk(&params, &circuit).map_err(|e| backend_error("keygen_vk", e))?;
        let pk = keygen_pk(&params, vk, &circuit).map_err(|e| backend_error("keygen_pk", e))?;
        debug!("Keys ready for depth {depth}");

        Ok(Self { depth, params, pk })
    }

    #[must_use]
    pub fn params(&self) -> &Params<vesta::Affine> {
        &self.params
    }
}

impl ProofSystem for Halo2Backend {
    fn depth(&self) -> usize {
        self.depth
    }

    fn prove(&self, witness: &Witness, statement: &Statement) -> ProofResult<ZkProof> {
        if witness.depth() != self.depth {
            return Err(ProofError::ProofGeneration(format!(
                "witness depth {} does not match circuit depth {}",
                witness.depth(),
                self.depth
            )));
        }

        let circuit = SetMembershipCircuit::from_witness(witness);
        let instance = statement.to_instance();
        let public_inputs: &[&[&[pallas::Base]]] = &[&[&instance]];

        let mut transcript = Blake2bWrite::<_, vesta::Affine, Challenge255<_>>::init(vec![]);
        create_proof(
            &self.params,
            &self.pk,
            &[circuit],
            public_inputs,
            OsRng,
            &mut transcript,
        )
        .map_err(|e| backend_error("create_proof", e))?;

        Ok(ZkProof(transcript.finalize()))
    }

    fn verify(&self, proof: &ZkProof, statement: &Statement) -> bool {
        let instance = statement.to_instance();
        let public_inputs: &[&[&[pallas::Base]]] = &[&[&instance]];

        let strategy = SingleVerifier::new(&self.params);
        let mut transcript =
            Blake2bRead::<_, vesta::Affine, Challenge255<_>>::init(proof.as_bytes());
        let result = verify_proof(
            &self.params,
            self.pk.get_vk(),
            strategy,
            public_inputs,
            &mut transcript,
        );
        if let Err(e) = &result {
            debug!("halo2 verification failed: {e:?}");
        }
        result.is_ok()
    }
}
