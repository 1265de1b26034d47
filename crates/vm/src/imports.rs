//! The module loader.
//!
//! An import path `a::b::c` is resolved against each configured import
//! root in order, trying the file `<root>/a/b/c.pyro`, the directory
//! module `<root>/a/b/c/self.pyro`, and finally a bare directory
//! `<root>/a/b/c/` (a namespace with no code to execute).
//!
//! Paths under `$std` bypass the filesystem: the registry maps known
//! standard-library module names to builtin loader functions, and embedded
//! modules carry their source in the binary and are compiled on first
//! import.

use std::path::PathBuf;

use crate::error::{Panic, VmResult};
use crate::heap::ObjKind;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

/// Registers the `$std` module tree and the resident builtin loaders.
pub(crate) fn install_builtin_modules(vm: &mut Vm) -> VmResult<()> {
    let std_module = vm.new_module()?;
    vm.push(Value::Obj(std_module))?;

    let std_name = vm.intern("$std")?;
    vm.map_set(vm.modules, Value::Obj(std_name), Value::Obj(std_module))?;
    vm.define_global("$std", Value::Obj(std_module))?;
    vm.pop()?;

    vm.builtin_modules.insert("pyro", load_mod_pyro);
    Ok(())
}

/// The `$std::pyro` module: language version constants and VM
/// introspection.
fn load_mod_pyro(vm: &mut Vm, module: ObjRef) -> VmResult<()> {
    vm.define_member(module, "version_major", Value::I64(0))?;
    vm.define_member(module, "version_minor", Value::I64(6))?;
    vm.define_member(module, "version_patch", Value::I64(0))?;
    let version = vm.intern("0.6.0")?;
    vm.define_member(module, "version_string", Value::Obj(version))?;

    vm.define_member_fn(module, "memory", 0, |vm, _args| {
        Ok(Value::I64(vm.heap.bytes_allocated() as i64))
    })?;
    vm.define_member_fn(module, "object_count", 0, |vm, _args| {
        Ok(Value::I64(vm.heap.live_objects() as i64))
    })?;
    vm.define_member_fn(module, "gc", 0, |vm, _args| {
        vm.collect_garbage();
        Ok(Value::Null)
    })?;
    Ok(())
}

impl Vm {
    /// Registers a builtin `$std` module backed by a loader function.
    pub fn register_builtin_module(
        &mut self,
        name: &'static str,
        loader: crate::vm::BuiltinModuleLoader,
    ) {
        self.builtin_modules.insert(name, loader);
    }

    /// Registers a `$std` module whose source is embedded in the binary;
    /// it is compiled on first import.
    pub fn register_embedded_module(&mut self, name: &'static str, source: &'static str) {
        self.embedded_modules.insert(name, source);
    }

    /// Locates and executes the module for the path `names` (interned
    /// string values) in the context of `module`.
    pub(crate) fn import_module(&mut self, names: &[Value], module: ObjRef) -> VmResult<()> {
        if names.len() == 2 && self.value_name(names[0]).as_deref() == Some("$std") {
            return self.load_std_module(names[1], module);
        }

        let root_count = self.heap.vec(self.import_roots).count();
        for root_index in 0..root_count {
            let root_value = self.heap.vec(self.import_roots).values()[root_index];
            let root = self
                .value_name(root_value)
                .ok_or_else(|| Panic::value_error("Invalid import root (not a string)."))?;
            if root.is_empty() {
                return Err(Panic::value_error("Invalid import root (empty string).").into());
            }

            let mut dir = PathBuf::from(&root);
            for name in &names[..names.len() - 1] {
                let component = self
                    .value_name(*name)
                    .ok_or_else(|| Panic::value_error("Invalid import path component."))?;
                dir.push(component);
            }
            let last = self
                .value_name(names[names.len() - 1])
                .ok_or_else(|| Panic::value_error("Invalid import path component."))?;

            // 1. A plain module file: BASE/a/b/c.pyro
            let file = dir.join(format!("{last}.pyro"));
            if file.is_file() {
                log::debug!("import: {}", file.display());
                return self.exec_file_in_module(&file.to_string_lossy(), module);
            }

            // 2. A directory module with an entry file: BASE/a/b/c/self.pyro
            let entry_file = dir.join(&last).join("self.pyro");
            if entry_file.is_file() {
                log::debug!("import: {}", entry_file.display());
                return self.exec_file_in_module(&entry_file.to_string_lossy(), module);
            }

            // 3. A bare directory: a namespace with no code to execute.
            if dir.join(&last).is_dir() {
                return Ok(());
            }
        }

        let last = self
            .value_name(names[names.len() - 1])
            .unwrap_or_else(|| "<module>".to_string());
        Err(Panic::module_not_found(format!("Unable to locate module '{last}'.")).into())
    }

    fn load_std_module(&mut self, name: Value, module: ObjRef) -> VmResult<()> {
        let Some(name_text) = self.value_name(name) else {
            return Err(Panic::value_error("Invalid import path component.").into());
        };

        if let Some(loader) = self.builtin_modules.get(name_text.as_str()).copied() {
            log::debug!("import: builtin module '{name_text}'");
            return loader(self, module);
        }
        if let Some(source) = self.embedded_modules.get(name_text.as_str()).copied() {
            log::debug!("import: embedded module '{name_text}'");
            return self.exec_code_in_module(
                source.as_bytes(),
                &format!("$std::{name_text}"),
                module,
            );
        }

        Err(Panic::module_not_found(format!(
            "Invalid standard library module '{name_text}'.",
        ))
        .into())
    }

    fn value_name(&self, value: Value) -> Option<String> {
        match value {
            Value::Obj(obj_ref) => match &self.heap.object(obj_ref).kind {
                ObjKind::Str(string) => Some(string.to_string_lossy()),
                _ => None,
            },
            _ => None,
        }
    }
}
