//! High-level test setup helpers.

use std::sync::Arc;

use fastcrypto::ed25519::{Ed25519KeyPair, Ed25519PrivateKey, Ed25519Signature};
use fastcrypto::traits::{KeyPair, Signer, ToFromBytes};
use jigvm_core::{
    package_id, Arg, ArtifactCompiler, ExecConfig, Instruction, MemoryStateStore, Transaction, Vm,
};
use jigvm_types::{Address, Output, PackageId};

use super::fixtures::package_sources;

/// A VM with the coin, sheep and shepherd packages registered.
pub struct World {
    pub vm: Vm,
    pub store: Arc<MemoryStateStore>,
    pub coin_pkg: PackageId,
    pub sheep_pkg: PackageId,
    pub shepherd_pkg: PackageId,
    pub alice: Ed25519KeyPair,
    pub bob: Ed25519KeyPair,
}

impl World {
    pub fn alice_addr(&self) -> Address {
        address_of(&self.alice)
    }

    pub fn bob_addr(&self) -> Address {
        address_of(&self.bob)
    }

    /// Mint a 1000 unit coin for alice that can pay for a transaction.
    pub fn fee_coin(&self, seed: u64) -> Output {
        self.vm
            .mint_coin(self.alice_addr(), 1_000, seed)
            .expect("mint fee coin")
    }

    /// LOAD + FUND prefix spending `coin`. Occupies statements 0 and 1.
    pub fn funded(&self, coin: &Output, rest: Vec<Instruction>) -> Vec<Instruction> {
        let mut instructions = vec![
            Instruction::Load {
                location: coin.location,
            },
            Instruction::Fund { coin_idx: 0 },
        ];
        instructions.extend(rest);
        instructions
    }
}

pub fn keypair(seed: u8) -> Ed25519KeyPair {
    Ed25519KeyPair::from(Ed25519PrivateKey::from_bytes(&[seed; 32]).expect("private key"))
}

pub fn address_of(kp: &Ed25519KeyPair) -> Address {
    Address::from_pubkey(kp.public().as_bytes())
}

/// bcs-encoded instruction argument.
pub fn arg<T: serde::Serialize>(value: &T) -> Arg {
    Arg::Value(bcs::to_bytes(value).expect("encode argument"))
}

pub fn world() -> World {
    world_with(ExecConfig::default())
}

pub fn world_with(config: ExecConfig) -> World {
    let (coin_entries, coin_sources) = package_sources("coin", &[]);
    let coin_pkg = package_id(&coin_entries, &coin_sources).expect("coin package id");

    let store = Arc::new(MemoryStateStore::new());
    let vm = Vm::new(config.with_coin_package(coin_pkg))
        .expect("create vm")
        .with_state(store.clone())
        .with_compiler(Arc::new(ArtifactCompiler));

    vm.deploy_package(&coin_entries, &coin_sources)
        .expect("deploy coin");
    let (entries, sources) = package_sources("sheep", &[]);
    let sheep_pkg = vm.deploy_package(&entries, &sources).expect("deploy sheep");
    let (entries, sources) = package_sources("shepherd", &[("SHEEP_PKG", hex::encode(sheep_pkg.0))]);
    let shepherd_pkg = vm
        .deploy_package(&entries, &sources)
        .expect("deploy shepherd");

    World {
        vm,
        store,
        coin_pkg,
        sheep_pkg,
        shepherd_pkg,
        alice: keypair(1),
        bob: keypair(2),
    }
}

/// Append one SIGN per signer and fill in the signatures.
pub fn signed(mut instructions: Vec<Instruction>, signers: &[&Ed25519KeyPair]) -> Transaction {
    let start = instructions.len();
    for kp in signers {
        instructions.push(Instruction::Sign {
            sig: Vec::new(),
            pubkey: kp.public().as_bytes().to_vec(),
        });
    }
    let mut tx = Transaction::new(instructions);
    let message = tx.sighash(tx.len()).expect("sighash");
    for (i, kp) in signers.iter().enumerate() {
        let signature: Ed25519Signature = kp.sign(&message);
        if let Instruction::Sign { sig, .. } = &mut tx.instructions[start + i] {
            *sig = signature.as_ref().to_vec();
        }
    }
    tx
}

/// Append a SIGNTO covering everything pushed so far.
pub fn sign_to(tx: &mut Transaction, kp: &Ed25519KeyPair) {
    let idx = tx.len();
    let message = tx.sighash(idx).expect("sighash");
    let signature: Ed25519Signature = kp.sign(&message);
    tx.push(Instruction::SignTo {
        sig: signature.as_ref().to_vec(),
        pubkey: kp.public().as_bytes().to_vec(),
    });
}
