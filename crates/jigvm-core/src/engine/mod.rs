//! # Transaction execution engine
//!
//! Interprets one [`Transaction`] into an [`ExecutionResult`] or aborts it as
//! a whole. Nothing outside the wasmtime store created for the transaction is
//! touched until the caller commits the result.
//!
//! ## Execution state
//!
//! Everything a transaction accumulates lives in [`TxState`], the data of its
//! wasmtime store:
//!
//! - **statements**: one per executed instruction, addressed by index
//! - **instances**: at most one [`ModuleInstance`] per package
//! - **jigs**: an arena keyed by origin; jigs never own each other, they only
//!   hold origin pointers resolved through this arena
//! - **frames**: the explicit host-call stack, one caller identity per level
//!
//! Guest code re-enters the engine through the host imports in `host`, which
//! run the same lock checks as top-level instructions before dispatching.
//!
//! ## Finalization
//!
//! After the last instruction every touched jig is serialized. Frozen jigs
//! are destroyed: they are recorded as spent and produce no output. Jigs that
//! are still open abort the transaction.

mod calls;
mod host;
mod jigs;
mod result;

pub use host::{build_linker, HOST_MODULE};
pub use result::ExecutionResult;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use jigvm_types::{Address, Output, PackageId, Pointer};
use smallvec::SmallVec;
use tracing::{debug, info, info_span, trace, warn};
use uuid::Uuid;
use wasmtime::{AsContextMut, Engine, Linker, Store, StoreContextMut, StoreLimits, StoreLimitsBuilder};

use crate::abi::{FieldLayout, Ty};
use crate::config::ExecConfig;
use crate::crypto::SignatureVerifier;
use crate::errors::ExecError;
use crate::instance::ModuleInstance;
use crate::locks::{AuthContext, CallerId, Lock};
use crate::marshal::{check_value, collect_jigs, decode_value, encode_state, read_fields, read_value, Value};
use crate::registry::{package_id, Compiler, Package, PackageRegistry};
use crate::state::{Spend, StateStore};
use crate::tx::{Arg, Instruction, LockSpec, Transaction};

use jigs::JigEntry;

/// Store context handed through the engine and host calls.
pub(crate) type Cx<'a> = StoreContextMut<'a, TxState>;

/// Collaborators shared by every transaction of a [`crate::Vm`].
#[derive(Clone)]
pub(crate) struct TxEnv {
    pub engine: Engine,
    pub linker: Arc<Linker<TxState>>,
    pub registry: Arc<dyn PackageRegistry>,
    pub state: Arc<dyn StateStore>,
    pub compiler: Arc<dyn Compiler>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub config: ExecConfig,
}

// =============================================================================
// Statements and frames
// =============================================================================

/// Result of one instruction, addressable by later instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Package(PackageId),
    Jig(Pointer),
    Value(Ty, Value),
    Empty,
}

impl Statement {
    fn from_return(ret: Option<&Ty>, value: Option<Value>) -> Self {
        match (ret, value) {
            (_, Some(Value::Jig(origin))) => Statement::Jig(origin),
            (Some(ty), Some(value)) => Statement::Value(ty.clone(), value),
            _ => Statement::Empty,
        }
    }
}

/// Which instructions a signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignScope {
    /// SIGN: the whole transaction.
    All,
    /// SIGNTO at this index: the instructions before it.
    Before(usize),
}

impl SignScope {
    fn covers(self, instruction: usize) -> bool {
        match self {
            SignScope::All => true,
            SignScope::Before(end) => instruction < end,
        }
    }
}

/// One level of the host-call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Frame {
    /// Identity lock checks see while this frame runs.
    pub identity: CallerId,
    /// Instance whose code is running.
    pub instance: usize,
}

// =============================================================================
// TxState
// =============================================================================

/// Per-transaction execution state, stored as the wasmtime store data.
pub struct TxState {
    env: Arc<TxEnv>,
    tx_hash: [u8; 32],
    current: usize,
    signers: Vec<(Address, SignScope)>,
    funded: bool,
    funded_amount: u64,
    statements: Vec<Statement>,
    instances: Vec<ModuleInstance>,
    instance_by_pkg: HashMap<PackageId, usize>,
    jigs: Vec<JigEntry>,
    jig_by_origin: HashMap<Pointer, usize>,
    frames: SmallVec<[Frame; 8]>,
    /// Next index for pointers minted during execution.
    next_index: u32,
    staged: BTreeMap<PackageId, Arc<Package>>,
    deploys: Vec<Arc<Package>>,
    limits: StoreLimits,
}

impl TxState {
    fn new(env: Arc<TxEnv>, tx_hash: [u8; 32], tx_len: usize, signers: Vec<(Address, SignScope)>) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(env.config.max_memory_bytes)
            .build();
        Self {
            env,
            tx_hash,
            current: 0,
            signers,
            funded: false,
            funded_amount: 0,
            statements: Vec::with_capacity(tx_len),
            instances: Vec::new(),
            instance_by_pkg: HashMap::new(),
            jigs: Vec::new(),
            jig_by_origin: HashMap::new(),
            frames: SmallVec::new(),
            next_index: tx_len as u32,
            staged: BTreeMap::new(),
            deploys: Vec::new(),
            limits,
        }
    }

    pub fn tx_hash(&self) -> &[u8; 32] {
        &self.tx_hash
    }

    pub fn is_funded(&self) -> bool {
        self.funded
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Mint a pointer for a jig created or re-emitted during execution.
    fn fresh_pointer(&mut self) -> Pointer {
        let ptr = Pointer::new(self.tx_hash, self.next_index);
        self.next_index += 1;
        ptr
    }

    fn statement(&self, idx: u16) -> Result<&Statement> {
        self.statements.get(idx as usize).ok_or_else(|| {
            ExecError::execution(format!(
                "statement {} out of bounds ({} available)",
                idx,
                self.statements.len()
            ))
            .into()
        })
    }

    fn package_stmt(&self, idx: u16) -> Result<PackageId> {
        match self.statement(idx)? {
            Statement::Package(id) => Ok(*id),
            _ => Err(ExecError::execution(format!("statement {} is not a package", idx)).into()),
        }
    }

    fn jig_stmt(&self, idx: u16) -> Result<Pointer> {
        match self.statement(idx)? {
            Statement::Jig(origin) => Ok(*origin),
            _ => Err(ExecError::execution(format!("statement {} is not a jig", idx)).into()),
        }
    }
}

impl AuthContext for TxState {
    fn caller(&self) -> CallerId {
        self.frames
            .last()
            .map(|f| f.identity)
            .unwrap_or(CallerId::Transaction)
    }

    fn is_signed_by(&self, address: &Address) -> bool {
        self.signers
            .iter()
            .any(|(signer, scope)| signer == address && scope.covers(self.current))
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Convert an internal failure into the public error, attaching the index of
/// the instruction that raised it.
fn report(err: anyhow::Error, instruction: Option<usize>) -> ExecError {
    let mut err = ExecError::from(err);
    if let Some(idx) = instruction {
        err = err.with_instruction(idx);
    }
    if err.requires_operator_attention() {
        warn!(error = %err, "invariant broken during execution");
    } else {
        debug!(error = %err, "transaction rejected");
    }
    err
}

fn verify_signatures(env: &TxEnv, tx: &Transaction) -> Result<Vec<(Address, SignScope)>, ExecError> {
    let mut signers = Vec::new();
    for (idx, instruction) in tx.instructions.iter().enumerate() {
        let (sig, pubkey, scope, upto) = match instruction {
            Instruction::Sign { sig, pubkey } => (sig, pubkey, SignScope::All, tx.len()),
            Instruction::SignTo { sig, pubkey } => (sig, pubkey, SignScope::Before(idx), idx),
            _ => continue,
        };
        let message = tx.sighash(upto).map_err(|e| report(e, Some(idx)))?;
        if !env.verifier.verify(sig, &message, pubkey) {
            return Err(ExecError::permission("invalid signature").with_instruction(idx));
        }
        let address = env
            .verifier
            .address_from_pubkey(pubkey)
            .map_err(|e| ExecError::permission(format!("{:#}", e)).with_instruction(idx))?;
        trace!(signer = %address, index = idx, "verified signature");
        signers.push((address, scope));
    }
    Ok(signers)
}

/// Execute `tx` against the collaborators in `env`.
pub(crate) fn execute(env: TxEnv, tx: &Transaction) -> Result<ExecutionResult, ExecError> {
    let tx_hash = tx.hash().map_err(|e| report(e, None))?;
    let execution_id = Uuid::new_v4();
    let span = info_span!(
        "execute_tx",
        tx = %hex::encode(tx_hash),
        execution_id = %execution_id
    );
    let _guard = span.enter();

    let signers = verify_signatures(&env, tx)?;
    let engine = env.engine.clone();
    let fuel_limit = env.config.fuel_limit;
    let state = TxState::new(Arc::new(env), tx_hash, tx.len(), signers);

    let mut store = Store::new(&engine, state);
    store.limiter(|s| &mut s.limits);
    store.set_fuel(fuel_limit).map_err(|e| report(e, None))?;

    let mut instruction_fuel = Vec::with_capacity(tx.len());
    for (idx, instruction) in tx.instructions.iter().enumerate() {
        let before = store.get_fuel().map_err(|e| report(e, Some(idx)))?;
        store.data_mut().current = idx;
        debug!(
            index = idx,
            opcode = %format_args!("{:#04x}", instruction.opcode().byte()),
            name = %instruction.opcode(),
            "executing instruction"
        );
        let statement = run_instruction(&mut store.as_context_mut(), instruction)
            .map_err(|e| report(e, Some(idx)))?;
        store.data_mut().statements.push(statement);
        let after = store.get_fuel().map_err(|e| report(e, Some(idx)))?;
        instruction_fuel.push(before.saturating_sub(after));
    }

    let (outputs, spends) = finalize(&mut store.as_context_mut()).map_err(|e| report(e, None))?;
    let remaining = store.get_fuel().map_err(|e| report(e, None))?;
    let data = store.into_data();

    info!(
        outputs = outputs.len(),
        spends = spends.len(),
        deploys = data.deploys.len(),
        fuel_used = fuel_limit.saturating_sub(remaining),
        "transaction executed"
    );
    Ok(ExecutionResult {
        tx_hash,
        outputs,
        spends,
        deploys: data.deploys,
        fuel_used: fuel_limit.saturating_sub(remaining),
        instruction_fuel,
        funded_amount: data.funded_amount,
        executed_at: Utc::now(),
        execution_id,
    })
}

fn run_instruction(cx: &mut Cx<'_>, instruction: &Instruction) -> Result<Statement> {
    let opcode = instruction.opcode();
    if opcode.requires_funding() && !cx.data().funded {
        return Err(ExecError::execution("not funded").into());
    }

    match instruction {
        Instruction::Import { pkg_id } => {
            jigs::instance_for(cx, pkg_id)?;
            Ok(Statement::Package(*pkg_id))
        }
        Instruction::Load { location } => jigs::load_by_location(cx, location).map(Statement::Jig),
        Instruction::LoadByOrigin { origin } => {
            jigs::load_by_origin(cx, origin).map(Statement::Jig)
        }
        Instruction::New {
            pkg_idx,
            class_idx,
            args,
        } => {
            let pkg = cx.data().package_stmt(*pkg_idx)?;
            let inst = jigs::instance_for(cx, &pkg)?;
            let abi = cx.data().instances[inst].abi().clone();
            let class = abi
                .class(*class_idx as usize)
                .map_err(|e| ExecError::execution(e.to_string()))?;
            let values = resolve_args(cx.data(), &class.constructor.args, args)?;
            check_jig_args(cx.data(), &class.constructor.args, &values)?;
            let jig = calls::construct(cx, inst, *class_idx as usize, values)?;
            Ok(Statement::Jig(cx.data().jigs[jig].origin))
        }
        Instruction::Exec {
            jig_idx,
            method_idx,
            args,
        } => {
            let origin = cx.data().jig_stmt(*jig_idx)?;
            let jig = jigs::resolve(cx, &origin)?;
            let entry = cx.data().jigs[jig];
            let abi = cx.data().instances[entry.instance].abi().clone();
            let class = abi.class(entry.export_idx)?;
            let method = class.method(*method_idx as usize).ok_or_else(|| {
                ExecError::execution(format!("{} has no method {}", class.class_ref, method_idx))
            })?;
            let values = resolve_args(cx.data(), &method.args, args)?;
            check_jig_args(cx.data(), &method.args, &values)?;
            let ret = calls::call_method(cx, jig, method, values)?;
            Ok(Statement::from_return(method.ret.as_ref(), ret))
        }
        Instruction::ExecFunc {
            pkg_idx,
            fn_idx,
            args,
        } => {
            let pkg = cx.data().package_stmt(*pkg_idx)?;
            let inst = jigs::instance_for(cx, &pkg)?;
            let abi = cx.data().instances[inst].abi().clone();
            let function = abi
                .function(*fn_idx as usize)
                .map_err(|e| ExecError::execution(e.to_string()))?;
            let values = resolve_args(cx.data(), &function.args, args)?;
            check_jig_args(cx.data(), &function.args, &values)?;
            let ret = calls::call_function(cx, inst, function, values)?;
            Ok(Statement::from_return(function.ret.as_ref(), ret))
        }
        Instruction::Fund { coin_idx } => fund(cx, *coin_idx),
        Instruction::Lock { jig_idx, lock } => {
            let origin = cx.data().jig_stmt(*jig_idx)?;
            let jig = jigs::resolve(cx, &origin)?;
            let new_lock = match lock {
                LockSpec::Address(addr) => Lock::Address(*addr),
                LockSpec::Public => Lock::Public,
                LockSpec::Frozen => Lock::Frozen,
                LockSpec::Jig(_) => {
                    return Err(ExecError::not_implemented(
                        "locking a jig to another jig from the transaction",
                    )
                    .into())
                }
            };
            jigs::change_lock(cx.data_mut(), jig, new_lock)?;
            Ok(Statement::Empty)
        }
        Instruction::Deploy { entries, sources } => deploy(cx.data_mut(), entries, sources),
        // Verified before execution started.
        Instruction::Sign { .. } | Instruction::SignTo { .. } => Ok(Statement::Empty),
    }
}

/// Turn instruction arguments into values of the parameter types.
fn resolve_args(state: &TxState, params: &[FieldLayout], args: &[Arg]) -> Result<Vec<Value>> {
    if params.len() != args.len() {
        return Err(ExecError::execution(format!(
            "expected {} arguments, got {}",
            params.len(),
            args.len()
        ))
        .into());
    }
    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let value = match arg {
                Arg::Value(bytes) => {
                    if param.ty.contains_jig() {
                        return Err(ExecError::execution(format!(
                            "argument {} holds jigs and must be passed by reference",
                            param.name
                        ))
                        .into());
                    }
                    decode_value(&param.ty, bytes).map_err(|e| {
                        ExecError::execution(format!("argument {}: {:#}", param.name, e))
                    })?
                }
                Arg::Ref(idx) => match state.statement(*idx)? {
                    Statement::Jig(origin) => Value::Jig(*origin),
                    Statement::Value(_, value) => value.clone(),
                    Statement::Package(_) | Statement::Empty => {
                        return Err(ExecError::execution(format!(
                            "statement {} has no value",
                            idx
                        ))
                        .into())
                    }
                },
            };
            check_value(&param.ty, &value)
                .map_err(|e| ExecError::execution(format!("argument {}: {:#}", param.name, e)))?;
            Ok(value)
        })
        .collect()
}

/// Check every jig argument against the class or interface its slot names.
pub(crate) fn check_jig_args(state: &TxState, params: &[FieldLayout], values: &[Value]) -> Result<()> {
    let mut found = Vec::new();
    for (param, value) in params.iter().zip(values) {
        collect_jigs(&param.ty, value, &mut found);
    }
    for (origin, expected) in found {
        if !jigs::conforms(state, &origin, &expected)? {
            return Err(ExecError::execution(format!(
                "jig {} is not a {}",
                origin,
                Ty::Jig(expected)
            ))
            .into());
        }
    }
    Ok(())
}

fn fund(cx: &mut Cx<'_>, coin_idx: u16) -> Result<Statement> {
    let origin = cx.data().jig_stmt(coin_idx)?;
    let jig = jigs::resolve(cx, &origin)?;
    let entry = cx.data().jigs[jig];
    let inst = cx.data().instances[entry.instance].clone();
    let abi = inst.abi().clone();
    let class = abi.class(entry.export_idx)?;

    let config = &cx.data().env.config;
    let package_matches = config.coin_package.map_or(true, |pkg| pkg == *abi.pkg_id());
    if class.name() != config.coin_class_name || !package_matches {
        return Err(ExecError::execution(format!("jig {} is not a coin", origin)).into());
    }
    let min = config.min_fund_amount;
    let field = class
        .field("amount")
        .filter(|f| f.ty == Ty::U64)
        .ok_or_else(|| ExecError::execution("coin class has no u64 amount field"))?;

    entry
        .lock
        .assert_open(cx.data())
        .map_err(|e| e.with_origin(origin))?;

    let amount = {
        let mem = inst.memory(cx.as_context_mut());
        read_value(&mem, &field.ty, entry.ptr + field.offset)?
    }
    .as_u64()
    .ok_or_else(|| anyhow!("coin amount is not a u64"))?;
    if amount < min {
        return Err(ExecError::execution(format!(
            "coin amount {} below minimum {}",
            amount, min
        ))
        .into());
    }

    let state = cx.data_mut();
    state.jigs[jig].lock = Lock::Frozen;
    state.funded = true;
    state.funded_amount = state.funded_amount.saturating_add(amount);
    info!(amount, coin = %origin, "transaction funded");
    Ok(Statement::Empty)
}

fn deploy(
    state: &mut TxState,
    entries: &[String],
    sources: &BTreeMap<String, String>,
) -> Result<Statement> {
    let env = state.env.clone();
    let id = package_id(entries, sources)?;
    if state.staged.contains_key(&id) || env.registry.contains(&id)? {
        return Err(ExecError::execution(format!("package {} already deployed", id)).into());
    }
    let artifacts = env
        .compiler
        .compile(entries, sources)
        .map_err(|e| ExecError::execution(format!("compile failed: {:#}", e)))?;
    let pkg = Package::build(&env.engine, entries.to_vec(), sources.clone(), artifacts)
        .map_err(|e| ExecError::execution(format!("{:#}", e)))?;
    let pkg = Arc::new(pkg);
    info!(pkg = %id.short(), "staged package");
    state.staged.insert(id, pkg.clone());
    state.deploys.push(pkg);
    Ok(Statement::Package(id))
}

/// Serialize every touched jig.
fn finalize(cx: &mut Cx<'_>) -> Result<(Vec<Output>, Vec<Spend>)> {
    let mut outputs = Vec::new();
    let mut spends = Vec::new();
    for idx in 0..cx.data().jigs.len() {
        let entry = cx.data().jigs[idx];
        let spend = entry.prev_location.map(|location| Spend {
            origin: entry.origin,
            location,
        });
        if entry.lock.is_frozen() {
            spends.extend(spend);
            trace!(origin = %entry.origin, "jig destroyed");
            continue;
        }
        let lock = entry.lock.to_record(entry.origin)?;
        let inst = cx.data().instances[entry.instance].clone();
        let abi = inst.abi().clone();
        let class = abi.class(entry.export_idx)?;
        let values = {
            let mem = inst.memory(cx.as_context_mut());
            read_fields(&mem, &class.fields, entry.ptr)?
        };
        let state = encode_state(&class.field_tys(), &values)
            .map_err(|e| ExecError::execution(format!("jig {}: {:#}", entry.origin, e)))?;
        let location = match spend {
            None => entry.origin,
            Some(spend) => {
                spends.push(spend);
                cx.data_mut().fresh_pointer()
            }
        };
        outputs.push(Output {
            origin: entry.origin,
            location,
            class_ptr: Pointer::class(abi.pkg_id(), entry.export_idx as u32),
            lock,
            state,
        });
    }
    Ok((outputs, spends))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_scope_coverage() {
        assert!(SignScope::All.covers(100));
        assert!(SignScope::Before(3).covers(2));
        assert!(!SignScope::Before(3).covers(3));
    }

    #[test]
    fn test_statement_from_return() {
        let origin = Pointer::new([1; 32], 2);
        assert_eq!(
            Statement::from_return(Some(&Ty::Nullable(Box::new(Ty::U8))), Some(Value::Jig(origin))),
            Statement::Jig(origin)
        );
        assert_eq!(
            Statement::from_return(Some(&Ty::U64), Some(Value::U64(3))),
            Statement::Value(Ty::U64, Value::U64(3))
        );
        assert_eq!(Statement::from_return(None, None), Statement::Empty);
    }
}
