//! The reference VM
//!
//! Every method is backed by a raw metadata record laid out exactly as the
//! engine's layout table describes for the configured flavor and API level.
//! Dispatch goes through the record: the declaring-class slot decides which
//! class is initialized and whose private members are reachable, the access
//! flags gate calls, and the interpreter or compiled entry slot (depending on
//! [`ExecutionMode`]) selects the body. A record transplant therefore changes
//! behavior exactly the way it does on a real VM.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use splice_engine::vm::layout::layout_for;
use splice_engine::vm::{Slot, METHOD_REPLACE_ANNOTATION};
use splice_engine::{
    AccessFlags, ClassId, ClassLoader, ClassTable, FieldDescriptor, FieldId, ManagedRuntime,
    MethodDescriptor, MethodId, MethodReplace, RecordLayout, RuntimeError, RuntimeFlavor,
    RuntimeResult,
};
use tracing::debug;

use crate::bundle::BundleTable;
use crate::code::{AnnotationDef, ClassDef, Expr, StaticInit, Value};
use crate::loader::VmLoader;

/// Record layout used when the configured VM has no validated layout
static FALLBACK_LAYOUT: RecordLayout = RecordLayout {
    name: "reference",
    flavor: RuntimeFlavor::Unknown,
    min_api: 0,
    max_api: 0,
    size: 48,
    declaring_class: Slot::new(0, 4),
    access_flags: Slot::new(4, 4),
    method_index: Slot::new(8, 4),
    interpreter_entry: Slot::new(16, 8),
    compiled_entry: Slot::new(24, 8),
};

/// Which entry slot dispatch reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Interpreter,
    Compiled,
}

/// VM identity and behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Reported VM version
    pub vm_version: String,
    /// Reported platform API level
    pub api_level: u32,
    /// Dispatch mode
    pub mode: ExecutionMode,
}

impl VmConfig {
    /// An ART-flavored VM
    pub fn art(api_level: u32) -> Self {
        Self {
            vm_version: "2.1.0".to_string(),
            api_level,
            mode: ExecutionMode::default(),
        }
    }

    /// A Dalvik-flavored VM
    pub fn dalvik(api_level: u32) -> Self {
        Self {
            vm_version: "1.6.0".to_string(),
            api_level,
            mode: ExecutionMode::default(),
        }
    }

    /// Same VM with another dispatch mode
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InitState {
    Uninitialized,
    Running,
    Done,
    Failed(String),
}

pub(crate) struct ClassData {
    pub(crate) name: String,
    pub(crate) loader: Arc<dyn ClassLoader>,
    pub(crate) fields: Vec<FieldId>,
    pub(crate) methods: Vec<MethodId>,
    pub(crate) clinit: Vec<StaticInit>,
    pub(crate) init: InitState,
}

pub(crate) struct FieldData {
    pub(crate) class: ClassId,
    pub(crate) name: String,
    pub(crate) flags: AccessFlags,
    pub(crate) is_static: bool,
    pub(crate) value: Value,
}

pub(crate) struct MethodData {
    pub(crate) name: String,
    pub(crate) params: Vec<String>,
    pub(crate) annotations: Vec<AnnotationDef>,
    pub(crate) record: Vec<u8>,
}

pub(crate) struct CodeData {
    /// Class whose loader resolves the names the body mentions
    pub(crate) owner: ClassId,
    pub(crate) body: Expr,
}

pub(crate) struct ObjectData {
    pub(crate) class: ClassId,
    pub(crate) fields: HashMap<String, Value>,
}

#[derive(Default)]
pub(crate) struct VmState {
    pub(crate) classes: Vec<ClassData>,
    pub(crate) fields: Vec<FieldData>,
    pub(crate) methods: Vec<MethodData>,
    pub(crate) code: Vec<CodeData>,
    pub(crate) objects: Vec<ObjectData>,
    /// `(loader identity, class name) -> class`
    pub(crate) defined: HashMap<(String, String), ClassId>,
}

impl VmState {
    pub(crate) fn class(&self, id: ClassId) -> RuntimeResult<&ClassData> {
        self.classes
            .get(id.0 as usize)
            .ok_or(RuntimeError::UnknownClass(id))
    }

    pub(crate) fn class_mut(&mut self, id: ClassId) -> RuntimeResult<&mut ClassData> {
        self.classes
            .get_mut(id.0 as usize)
            .ok_or(RuntimeError::UnknownClass(id))
    }

    pub(crate) fn method(&self, id: MethodId) -> RuntimeResult<&MethodData> {
        self.methods
            .get(id.0 as usize)
            .ok_or(RuntimeError::UnknownMethod(id))
    }

    pub(crate) fn field(&self, id: FieldId) -> RuntimeResult<&FieldData> {
        self.fields
            .get(id.0 as usize)
            .ok_or(RuntimeError::UnknownField(id))
    }
}

/// A small managed runtime
pub struct Vm {
    pub(crate) this: Weak<Vm>,
    pub(crate) config: VmConfig,
    pub(crate) layout: &'static RecordLayout,
    pub(crate) state: RwLock<VmState>,
    host: Arc<VmLoader>,
}

impl Vm {
    /// Boot a VM; the host loader already knows the engine's annotation type
    pub fn new(config: VmConfig) -> Arc<Self> {
        let flavor = RuntimeFlavor::from_vm_version(&config.vm_version);
        let layout = layout_for(flavor, config.api_level).unwrap_or(&FALLBACK_LAYOUT);

        let vm = Arc::new_cyclic(|this: &Weak<Vm>| Self {
            this: this.clone(),
            host: Arc::new(VmLoader::new("host", this.clone(), None)),
            config,
            layout,
            state: RwLock::new(VmState::default()),
        });
        vm.define_host(&ClassDef::new(METHOD_REPLACE_ANNOTATION));
        debug!(layout = layout.name, "vm booted");
        vm
    }

    /// Record layout in use
    pub fn layout(&self) -> &'static RecordLayout {
        self.layout
    }

    /// Dispatch mode
    pub fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    /// The application loader
    pub fn host(&self) -> Arc<VmLoader> {
        self.host.clone()
    }

    /// Create a loader, e.g. for a plugin
    pub fn new_loader(
        &self,
        identity: &str,
        parent: Option<Arc<dyn ClassLoader>>,
    ) -> Arc<VmLoader> {
        Arc::new(VmLoader::new(identity, self.this.clone(), parent))
    }

    /// Define a class in the host loader
    pub fn define_host(&self, def: &ClassDef) -> ClassId {
        self.define(def, self.host.clone())
    }

    /// Define `def` with `loader` as defining loader
    ///
    /// Defining the same name twice through the same loader identity returns
    /// the first class.
    pub fn define(&self, def: &ClassDef, loader: Arc<dyn ClassLoader>) -> ClassId {
        let key = (loader.identity(), def.name.clone());
        let mut state = self.state.write();
        if let Some(existing) = state.defined.get(&key) {
            return *existing;
        }

        let class = ClassId(state.classes.len() as u64);
        let mut fields = Vec::with_capacity(def.fields.len());
        for f in &def.fields {
            let id = FieldId(state.fields.len() as u64);
            state.fields.push(FieldData {
                class,
                name: f.name.clone(),
                flags: AccessFlags(f.flags),
                is_static: f.is_static,
                value: Value::Null,
            });
            fields.push(id);
        }

        let layout = self.layout;
        let mut methods = Vec::with_capacity(def.methods.len());
        for (index, m) in def.methods.iter().enumerate() {
            state.code.push(CodeData {
                owner: class,
                body: m.body.clone(),
            });
            // entry 0 means "no code"
            let entry = state.code.len() as u64;

            let mut flags = AccessFlags(m.flags);
            if m.is_static {
                flags = flags | AccessFlags::STATIC;
            }
            let mut record = layout.blank();
            layout.write(&mut record, layout.declaring_class, class.0);
            layout.write(&mut record, layout.access_flags, flags.bits() as u64);
            layout.write(&mut record, layout.method_index, index as u64);
            layout.write(&mut record, layout.interpreter_entry, entry);
            layout.write(&mut record, layout.compiled_entry, entry);

            let id = MethodId(state.methods.len() as u64);
            state.methods.push(MethodData {
                name: m.name.clone(),
                params: m.params.clone(),
                annotations: m.annotations.clone(),
                record,
            });
            methods.push(id);
        }

        state.classes.push(ClassData {
            name: def.name.clone(),
            loader,
            fields,
            methods,
            clinit: def.clinit.clone(),
            init: InitState::Uninitialized,
        });
        debug!(class = %def.name, loader = %key.0, "defined class");
        state.defined.insert(key, class);
        class
    }

    pub(crate) fn find_defined(&self, loader: &str, name: &str) -> Option<ClassId> {
        self.state
            .read()
            .defined
            .get(&(loader.to_string(), name.to_string()))
            .copied()
    }

    /// Create an instance of `class` with the given field values
    pub fn new_object(&self, class: ClassId, fields: &[(&str, Value)]) -> RuntimeResult<Value> {
        let mut state = self.state.write();
        state.class(class)?;
        let id = state.objects.len() as u64;
        state.objects.push(ObjectData {
            class,
            fields: fields
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
        });
        Ok(Value::Object(id))
    }

    /// Current value of a static field
    pub fn static_value(&self, class: ClassId, field: &str) -> RuntimeResult<Value> {
        let state = self.state.read();
        let id = find_field(&state, class, field, true)?;
        Ok(state.field(id)?.value.clone())
    }

    /// Current access flags of a declared field
    pub fn field_flags(&self, class: ClassId, field: &str) -> RuntimeResult<AccessFlags> {
        let state = self.state.read();
        let data = state.class(class)?;
        data.fields
            .iter()
            .filter_map(|id| state.field(*id).ok())
            .find(|f| f.name == field)
            .map(|f| f.flags)
            .ok_or_else(|| RuntimeError::Execution(format!("no field {}", field)))
    }

    /// Whether the static initializer of `class` has completed
    pub fn is_initialized(&self, class: ClassId) -> RuntimeResult<bool> {
        Ok(self.state.read().class(class)?.init == InitState::Done)
    }

    /// Call a static method from outside managed code
    pub fn invoke_static(
        &self,
        class: ClassId,
        method: &str,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        self.call(None, class, method, None, args, 0)
    }

    /// Call an instance method on `receiver` from outside managed code
    pub fn invoke_virtual(
        &self,
        receiver: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        let Value::Object(object) = receiver else {
            return Err(RuntimeError::Execution(format!(
                "receiver {} is not an object",
                receiver
            )));
        };
        let class = self.object_class(*object)?;
        self.call(None, class, method, Some(*object), args, 0)
    }

    pub(crate) fn object_class(&self, object: u64) -> RuntimeResult<ClassId> {
        self.state
            .read()
            .objects
            .get(object as usize)
            .map(|o| o.class)
            .ok_or_else(|| RuntimeError::Execution(format!("dangling object@{}", object)))
    }

    fn resolve_annotation(
        &self,
        loader: &Arc<dyn ClassLoader>,
        annotations: &[AnnotationDef],
    ) -> Option<MethodReplace> {
        annotations
            .iter()
            .filter(|a| a.type_name == METHOD_REPLACE_ANNOTATION)
            // annotations whose type does not resolve are invisible
            .find(|a| loader.load_class(&a.type_name).is_ok())
            .map(|a| MethodReplace {
                clazz: a.values.get("clazz").cloned().unwrap_or_default(),
                method: a.values.get("method").cloned().unwrap_or_default(),
            })
    }
}

pub(crate) fn find_field(
    state: &VmState,
    class: ClassId,
    name: &str,
    is_static: bool,
) -> RuntimeResult<FieldId> {
    let data = state.class(class)?;
    data.fields
        .iter()
        .copied()
        .find(|id| {
            state
                .field(*id)
                .is_ok_and(|f| f.name == name && f.is_static == is_static)
        })
        .ok_or_else(|| {
            RuntimeError::Execution(format!("no field {}.{}", data.name, name))
        })
}

impl ManagedRuntime for Vm {
    fn vm_version(&self) -> String {
        self.config.vm_version.clone()
    }

    fn api_level(&self) -> u32 {
        self.config.api_level
    }

    fn host_loader(&self) -> Arc<dyn ClassLoader> {
        self.host.clone()
    }

    fn open_bundle(&self, bundle: &Path, opt_file: &Path) -> RuntimeResult<Arc<dyn ClassTable>> {
        let table: Arc<dyn ClassTable> = BundleTable::open(self.this.clone(), bundle, opt_file)?;
        Ok(table)
    }

    fn class_name(&self, class: ClassId) -> RuntimeResult<String> {
        Ok(self.state.read().class(class)?.name.clone())
    }

    fn initialize_class(&self, class: ClassId) -> RuntimeResult<()> {
        self.initialize(class)
    }

    fn declared_methods(&self, class: ClassId) -> RuntimeResult<Vec<MethodDescriptor>> {
        let (loader, raw) = {
            let state = self.state.read();
            let data = state.class(class)?;
            let mut raw = Vec::with_capacity(data.methods.len());
            for id in &data.methods {
                let m = state.method(*id)?;
                let flags = AccessFlags(self.layout.read(&m.record, self.layout.access_flags) as u32);
                raw.push((*id, m.name.clone(), m.params.clone(), flags, m.annotations.clone()));
            }
            (data.loader.clone(), raw)
        };

        Ok(raw
            .into_iter()
            .map(|(id, name, params, flags, annotations)| MethodDescriptor {
                id,
                name,
                params,
                flags,
                replace: self.resolve_annotation(&loader, &annotations),
            })
            .collect())
    }

    fn declared_fields(&self, class: ClassId) -> RuntimeResult<Vec<FieldDescriptor>> {
        let state = self.state.read();
        let data = state.class(class)?;
        data.fields
            .iter()
            .map(|id| {
                let f = state.field(*id)?;
                Ok(FieldDescriptor {
                    id: *id,
                    name: f.name.clone(),
                    flags: f.flags,
                })
            })
            .collect()
    }

    fn read_method_record(&self, method: MethodId) -> RuntimeResult<Vec<u8>> {
        Ok(self.state.read().method(method)?.record.clone())
    }

    fn write_method_record(
        &self,
        method: MethodId,
        edit: &mut dyn FnMut(&mut [u8]) -> RuntimeResult<()>,
    ) -> RuntimeResult<()> {
        let mut state = self.state.write();
        let data = state
            .methods
            .get_mut(method.0 as usize)
            .ok_or(RuntimeError::UnknownMethod(method))?;
        // edit a copy so a failed edit leaves the record untouched
        let mut record = data.record.clone();
        edit(&mut record)?;
        data.record = record;
        Ok(())
    }

    fn update_field_flags(
        &self,
        field: FieldId,
        update: &dyn Fn(AccessFlags) -> AccessFlags,
    ) -> RuntimeResult<AccessFlags> {
        let mut state = self.state.write();
        let data = state
            .fields
            .get_mut(field.0 as usize)
            .ok_or(RuntimeError::UnknownField(field))?;
        data.flags = update(data.flags);
        Ok(data.flags)
    }
}
