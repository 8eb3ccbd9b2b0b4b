//! Dispatch and evaluation

use std::sync::Arc;

use splice_engine::{AccessFlags, ClassId, ClassLoader, MethodId, RuntimeError, RuntimeResult};

use crate::code::{Expr, Value};
use crate::vm::{find_field, ExecutionMode, InitState, Vm};

/// Call depth at which execution is aborted
const MAX_DEPTH: usize = 256;

/// Execution context of one activation
struct Frame {
    /// Declaring class from the method record; decides member access
    declaring: ClassId,
    /// Loader that resolves names mentioned by the body
    resolver: Arc<dyn ClassLoader>,
    this: Option<u64>,
    args: Vec<Value>,
    depth: usize,
}

impl Vm {
    /// Dispatch `method` on `class` through its metadata record
    pub(crate) fn call(
        &self,
        caller: Option<ClassId>,
        class: ClassId,
        method: &str,
        this: Option<u64>,
        args: Vec<Value>,
        depth: usize,
    ) -> RuntimeResult<Value> {
        if depth > MAX_DEPTH {
            return Err(RuntimeError::Execution("call depth exceeded".to_string()));
        }

        let id = self.select_method(class, method, &args)?;
        let record = self.state.read().method(id)?.record.clone();
        let layout = self.layout;

        let declaring = ClassId(layout.read(&record, layout.declaring_class));
        let flags = AccessFlags(layout.read(&record, layout.access_flags) as u32);
        if let Some(caller) = caller {
            if caller != declaring && flags.contains(AccessFlags::PRIVATE) {
                return Err(RuntimeError::IllegalAccess(format!(
                    "{} is private",
                    method
                )));
            }
        }
        if flags.contains(AccessFlags::STATIC) != this.is_none() {
            return Err(RuntimeError::Execution(format!(
                "{} called with the wrong receiver kind",
                method
            )));
        }

        self.initialize(declaring)?;

        let slot = match self.config.mode {
            ExecutionMode::Interpreter => layout.interpreter_entry,
            ExecutionMode::Compiled => layout.compiled_entry,
        };
        let entry = layout.read(&record, slot) as usize;
        let (body, resolver) = {
            let state = self.state.read();
            let code = entry
                .checked_sub(1)
                .and_then(|i| state.code.get(i))
                .ok_or_else(|| RuntimeError::Execution(format!("{} has no code", method)))?;
            (code.body.clone(), state.class(code.owner)?.loader.clone())
        };

        let frame = Frame {
            declaring,
            resolver,
            this,
            args,
            depth,
        };
        self.eval(&frame, &body)
    }

    fn select_method(&self, class: ClassId, name: &str, args: &[Value]) -> RuntimeResult<MethodId> {
        let state = self.state.read();
        let data = state.class(class)?;
        data.methods
            .iter()
            .copied()
            .find(|id| {
                state.method(*id).is_ok_and(|m| {
                    m.name == name
                        && m.params.len() == args.len()
                        && m.params.iter().zip(args).all(|(p, a)| a.fits(p))
                })
            })
            .ok_or_else(|| {
                RuntimeError::Execution(format!("no method {}.{}/{}", data.name, name, args.len()))
            })
    }

    /// Run the static initializer of `class` once
    pub(crate) fn initialize(&self, class: ClassId) -> RuntimeResult<()> {
        let (name, clinit, loader) = {
            let mut state = self.state.write();
            let data = state.class_mut(class)?;
            match &data.init {
                InitState::Done | InitState::Running => return Ok(()),
                InitState::Failed(reason) => {
                    return Err(RuntimeError::InitializationFailed {
                        class: data.name.clone(),
                        reason: reason.clone(),
                    })
                }
                InitState::Uninitialized => data.init = InitState::Running,
            }
            (data.name.clone(), data.clinit.clone(), data.loader.clone())
        };

        let frame = Frame {
            declaring: class,
            resolver: loader,
            this: None,
            args: Vec::new(),
            depth: 0,
        };
        let result: RuntimeResult<()> = clinit.iter().try_for_each(|init| {
            let value = self.eval(&frame, &init.value)?;
            let mut state = self.state.write();
            let id = find_field(&state, class, &init.field, true)?;
            state.fields[id.0 as usize].value = value;
            Ok(())
        });

        let mut state = self.state.write();
        let data = state.class_mut(class)?;
        match result {
            Ok(()) => {
                data.init = InitState::Done;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                data.init = InitState::Failed(reason.clone());
                Err(RuntimeError::InitializationFailed {
                    class: name,
                    reason,
                })
            }
        }
    }

    fn eval(&self, frame: &Frame, expr: &Expr) -> RuntimeResult<Value> {
        match expr {
            Expr::Const(v) => Ok(v.clone()),
            Expr::Arg(i) => frame
                .args
                .get(*i)
                .cloned()
                .ok_or_else(|| RuntimeError::Execution(format!("no argument {}", i))),
            Expr::This => frame
                .this
                .map(Value::Object)
                .ok_or_else(|| RuntimeError::Execution("no receiver in static code".to_string())),
            Expr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&self.eval(frame, part)?.to_string());
                }
                Ok(Value::Str(out))
            }
            Expr::Add(a, b) => match (self.eval(frame, a)?, self.eval(frame, b)?) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
                (a, b) => Err(RuntimeError::Execution(format!("cannot add {} and {}", a, b))),
            },
            Expr::GetStatic { class, field } => {
                let class = frame.resolver.load_class(class)?;
                self.initialize(class)?;
                let state = self.state.read();
                let id = find_field(&state, class, field, true)?;
                let data = state.field(id)?;
                check_access(frame.declaring, data.class, data.flags, field)?;
                Ok(data.value.clone())
            }
            Expr::PutStatic {
                class,
                field,
                value,
            } => {
                let class = frame.resolver.load_class(class)?;
                self.initialize(class)?;
                let value = self.eval(frame, value)?;
                let mut state = self.state.write();
                let id = find_field(&state, class, field, true)?;
                let data = &mut state.fields[id.0 as usize];
                check_access(frame.declaring, data.class, data.flags, field)?;
                data.value = value.clone();
                Ok(value)
            }
            Expr::GetField { field } => {
                let object = frame
                    .this
                    .ok_or_else(|| RuntimeError::Execution("no receiver in static code".to_string()))?;
                let class = self.object_class(object)?;
                let state = self.state.read();
                let id = find_field(&state, class, field, false)?;
                let data = state.field(id)?;
                check_access(frame.declaring, data.class, data.flags, field)?;
                Ok(state.objects[object as usize]
                    .fields
                    .get(field)
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            Expr::InvokeStatic {
                class,
                method,
                args,
            } => {
                let class = frame.resolver.load_class(class)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(frame, a))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                self.call(Some(frame.declaring), class, method, None, args, frame.depth + 1)
            }
            Expr::Seq(exprs) => {
                let mut last = Value::Null;
                for e in exprs {
                    last = self.eval(frame, e)?;
                }
                Ok(last)
            }
        }
    }
}

/// Members that are not public are reachable only from their own class
fn check_access(
    context: ClassId,
    owner: ClassId,
    flags: AccessFlags,
    member: &str,
) -> RuntimeResult<()> {
    let restricted = flags.contains(AccessFlags::PRIVATE) || flags.contains(AccessFlags::PROTECTED);
    if context != owner && restricted {
        return Err(RuntimeError::IllegalAccess(format!(
            "{} is not accessible from {}",
            member, context
        )));
    }
    Ok(())
}
