//! Live instantiations of package modules.
//!
//! All instances of one transaction share a single wasmtime store, so fuel
//! and memory limits apply to the transaction as a whole.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::trace;
use wasmtime::{AsContext, AsContextMut, Instance, Linker, Memory, StoreContextMut, TypedFunc, Val};

use crate::abi::{AbiAccess, Ty};
use crate::memory::LinearMemory;
use crate::registry::{Package, ALLOC_EXPORT};

/// One instantiated package module.
#[derive(Clone)]
pub struct ModuleInstance {
    pkg: Arc<Package>,
    instance: Instance,
    memory: Memory,
    alloc: TypedFunc<u32, u32>,
    /// Export index in the target package for each ABI import, `None` for
    /// interfaces.
    import_exports: Arc<[Option<usize>]>,
}

impl ModuleInstance {
    pub fn instantiate<T: 'static>(
        mut cx: impl AsContextMut<Data = T>,
        linker: &Linker<T>,
        pkg: Arc<Package>,
        import_exports: Vec<Option<usize>>,
    ) -> Result<Self> {
        if import_exports.len() != pkg.abi().imports().len() {
            bail!(
                "package {} has {} imports, {} resolved",
                pkg.id().short(),
                pkg.abi().imports().len(),
                import_exports.len()
            );
        }
        let engine = cx.as_context().engine().clone();
        let module = pkg.module_for(&engine)?;
        let instance = linker
            .instantiate(&mut cx, &module)
            .with_context(|| format!("instantiate package {}", pkg.id().short()))?;
        let memory = instance
            .get_memory(&mut cx, "memory")
            .ok_or_else(|| anyhow!("package {} exports no memory", pkg.id().short()))?;
        let alloc = instance.get_typed_func::<u32, u32>(&mut cx, ALLOC_EXPORT)?;
        trace!(pkg = %pkg.id().short(), "instantiated module");
        Ok(Self {
            pkg,
            instance,
            memory,
            alloc,
            import_exports: import_exports.into(),
        })
    }

    pub fn pkg(&self) -> &Arc<Package> {
        &self.pkg
    }

    pub fn abi(&self) -> &Arc<AbiAccess> {
        self.pkg.abi()
    }

    /// Export index resolved for import `idx` when the instance was created.
    pub fn import_export(&self, idx: usize) -> Option<usize> {
        self.import_exports.get(idx).copied().flatten()
    }

    /// View of this instance's linear memory.
    pub fn memory<'a, T: 'static>(&self, cx: StoreContextMut<'a, T>) -> GuestMemory<'a, T> {
        GuestMemory {
            cx,
            memory: self.memory,
            alloc: self.alloc.clone(),
        }
    }

    /// Call export `name` with raw parameter words.
    ///
    /// `params` pairs each word with its ABI type so it can be passed as an
    /// i32 or i64. Returns the raw result word when the export has one.
    pub fn call<T: 'static>(
        &self,
        mut cx: impl AsContextMut<Data = T>,
        name: &str,
        params: &[(u64, bool)],
        expect_result: bool,
    ) -> Result<Option<u64>> {
        let func = self.instance.get_func(&mut cx, name).ok_or_else(|| {
            anyhow!(
                "package {} does not export {}",
                self.pkg.id().short(),
                name
            )
        })?;
        let result_count = func.ty(cx.as_context()).results().len();
        if result_count != expect_result as usize {
            bail!(
                "export {} returns {} values, expected {}",
                name,
                result_count,
                expect_result as usize
            );
        }
        let args: Vec<Val> = params
            .iter()
            .map(|&(bits, wide)| {
                if wide {
                    Val::I64(bits as i64)
                } else {
                    Val::I32(bits as u32 as i32)
                }
            })
            .collect();
        let mut results = vec![Val::I32(0); result_count];
        func.call(&mut cx, &args, &mut results)?;
        results.first().map(val_bits).transpose()
    }
}

/// Pair a raw word with whether it travels as an i64.
pub fn param(bits: u64, ty: &Ty) -> (u64, bool) {
    (bits, ty.is_wide())
}

fn val_bits(val: &Val) -> Result<u64> {
    match val {
        Val::I32(v) => Ok(*v as u32 as u64),
        Val::I64(v) => Ok(*v as u64),
        other => Err(anyhow!("unsupported wasm result {:?}", other)),
    }
}

/// [`LinearMemory`] over a wasm memory, allocating through the guest's
/// `__alloc` export.
pub struct GuestMemory<'a, T: 'a> {
    cx: StoreContextMut<'a, T>,
    memory: Memory,
    alloc: TypedFunc<u32, u32>,
}

impl<T: 'static> LinearMemory for GuestMemory<'_, T> {
    fn alloc(&mut self, size: u32) -> Result<u32> {
        let ptr = self.alloc.call(&mut self.cx, size)?;
        if ptr == 0 {
            bail!("guest allocator returned null for {} bytes", size);
        }
        self.check_range(ptr, size as u64)?;
        Ok(ptr)
    }

    fn data_size(&self) -> u64 {
        self.memory.data_size(&self.cx) as u64
    }

    fn read(&self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        self.check_range(ptr, len as u64)?;
        let mut buf = vec![0u8; len as usize];
        self.memory.read(&self.cx, ptr as usize, &mut buf)?;
        Ok(buf)
    }

    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<()> {
        self.check_range(ptr, bytes.len() as u64)?;
        self.memory.write(&mut self.cx, ptr as usize, bytes)?;
        Ok(())
    }
}
