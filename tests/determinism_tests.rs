//! Workspace-level determinism tests.
//!
//! Two independent VMs fed the same packages, coins and transactions must
//! end up with byte-identical results and state.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use fastcrypto::ed25519::{Ed25519KeyPair, Ed25519PrivateKey, Ed25519Signature};
use fastcrypto::traits::{KeyPair, Signer, ToFromBytes};
use jigvm::engine::{Arg, ArtifactCompiler, LockSpec, MemoryStateStore};
use jigvm::runner::{replay, run_and_commit};
use jigvm::types::{Address, PackageId};
use jigvm::{ExecConfig, Instruction, Transaction, Vm};

const FIXTURE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/crates/jigvm-core/tests/fixtures");

struct Node {
    vm: Vm,
    store: Arc<MemoryStateStore>,
}

fn sources(stem: &str) -> (Vec<String>, BTreeMap<String, String>) {
    let mut sources = BTreeMap::new();
    for name in [format!("{}.wat", stem), format!("{}.abi.json", stem)] {
        let text = std::fs::read_to_string(Path::new(FIXTURE_DIR).join(&name))
            .expect("fixture should load");
        sources.insert(name, text);
    }
    (vec![format!("{}.wat", stem)], sources)
}

fn keypair() -> Ed25519KeyPair {
    Ed25519KeyPair::from(Ed25519PrivateKey::from_bytes(&[7; 32]).expect("private key"))
}

fn owner(kp: &Ed25519KeyPair) -> Address {
    Address::from_pubkey(kp.public().as_bytes())
}

/// A VM with the coin package deployed and two fee coins minted.
fn node() -> (Node, PackageId) {
    let (entries, srcs) = sources("coin");
    let coin_pkg = jigvm::engine::package_id(&entries, &srcs).expect("package id");
    let store = Arc::new(MemoryStateStore::new());
    let vm = Vm::new(ExecConfig::default().with_coin_package(coin_pkg))
        .expect("create vm")
        .with_state(store.clone())
        .with_compiler(Arc::new(ArtifactCompiler));
    vm.deploy_package(&entries, &srcs).expect("deploy coin");
    (Node { vm, store }, coin_pkg)
}

fn signed(instructions: Vec<Instruction>, kp: &Ed25519KeyPair) -> Transaction {
    let mut tx = Transaction::new(instructions);
    let idx = tx.push(Instruction::Sign {
        sig: Vec::new(),
        pubkey: kp.public().as_bytes().to_vec(),
    });
    let message = tx.sighash(tx.len()).expect("sighash");
    let signature: Ed25519Signature = kp.sign(&message);
    if let Instruction::Sign { sig, .. } = &mut tx.instructions[idx] {
        *sig = signature.as_ref().to_vec();
    }
    tx
}

fn amount(value: u64) -> Arg {
    Arg::Value(bcs::to_bytes(&value).expect("encode amount"))
}

/// Mint the fee coins on `node` and build a send-then-split workload.
fn workload(node: &Node, coin_pkg: PackageId, kp: &Ed25519KeyPair) -> Vec<Transaction> {
    let me = owner(kp);
    let fee1 = node.vm.mint_coin(me, 1_000, 1).expect("mint");
    let fee2 = node.vm.mint_coin(me, 1_000, 2).expect("mint");

    let first = signed(
        vec![
            Instruction::Load {
                location: fee1.location,
            },
            Instruction::Fund { coin_idx: 0 },
            Instruction::Import { pkg_id: coin_pkg },
            Instruction::New {
                pkg_idx: 2,
                class_idx: 0,
                args: vec![amount(900)],
            },
            Instruction::Lock {
                jig_idx: 3,
                lock: LockSpec::Address(me),
            },
        ],
        kp,
    );
    let coin_origin = jigvm::types::Pointer::new(first.hash().expect("hash"), 3);

    let second = signed(
        vec![
            Instruction::Load {
                location: fee2.location,
            },
            Instruction::Fund { coin_idx: 0 },
            Instruction::LoadByOrigin {
                origin: coin_origin,
            },
            Instruction::Exec {
                jig_idx: 2,
                method_idx: 0,
                args: vec![amount(250)],
            },
            Instruction::Lock {
                jig_idx: 3,
                lock: LockSpec::Public,
            },
        ],
        kp,
    );
    vec![first, second]
}

/// Test that two nodes replaying the same transactions agree byte for byte.
#[test]
fn test_replay_is_deterministic() {
    let kp = keypair();
    let (a, coin_a) = node();
    let (b, coin_b) = node();
    assert_eq!(coin_a, coin_b);

    let txs = workload(&a, coin_a, &kp);
    let txs_b = workload(&b, coin_b, &kp);
    assert_eq!(txs, txs_b);

    let results_a = replay(&a.vm, &txs).expect("replay on a");
    let results_b = replay(&b.vm, &txs).expect("replay on b");
    assert_eq!(results_a.len(), 2);

    for (ra, rb) in results_a.iter().zip(&results_b) {
        assert_eq!(ra.to_bytes().expect("encode"), rb.to_bytes().expect("encode"));
        assert_eq!(ra.instruction_fuel, rb.instruction_fuel);
        assert_ne!(ra.execution_id, rb.execution_id);
    }
    assert_eq!(
        a.store.snapshot().expect("snapshot"),
        b.store.snapshot().expect("snapshot")
    );
}

/// Test that a failing transaction stops replay and leaves state unchanged.
#[test]
fn test_replay_stops_at_failure() {
    let kp = keypair();
    let (n, coin_pkg) = node();
    let txs = workload(&n, coin_pkg, &kp);

    run_and_commit(&n.vm, &txs[0]).expect("first transaction");
    let before = n.store.snapshot().expect("snapshot");

    // Replaying the first transaction again spends a coin that is gone.
    let err = replay(&n.vm, &[txs[0].clone(), txs[1].clone()]).expect_err("replay should fail");
    assert!(err.to_string().contains("transaction 0"), "{:#}", err);
    assert_eq!(n.store.snapshot().expect("snapshot"), before);
}
