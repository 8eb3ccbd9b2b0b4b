//! Class definitions and the method body language
//!
//! Classes travel inside bundles as JSON under `classes/`:
//!
//! ```json
//! {
//!   "name": "U_CF",
//!   "fields": [{ "name": "prefix", "flags": 10, "is_static": true }],
//!   "clinit": [{ "field": "prefix", "value": { "const": { "str": "fix-" } } }],
//!   "methods": [{
//!     "name": "f",
//!     "params": ["int"],
//!     "flags": 9,
//!     "is_static": true,
//!     "annotations": [{
//!       "type": "splice.annotation.MethodReplace",
//!       "values": { "clazz": "U", "method": "f" }
//!     }],
//!     "body": { "concat": [{ "get_static": { "class": "U_CF", "field": "prefix" } }, { "arg": 0 }] }
//!   }]
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use splice_engine::AccessFlags;

/// A runtime value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Int(i64),
    Str(String),
    Null,
    /// Reference to a heap object
    Object(u64),
}

impl Value {
    /// Whether this value may be passed for a parameter of type `ty`
    pub fn fits(&self, ty: &str) -> bool {
        match self {
            Value::Int(_) => ty == "int",
            Value::Str(_) => ty == "String",
            Value::Null | Value::Object(_) => ty != "int",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => f.write_str(s),
            Value::Null => f.write_str("null"),
            Value::Object(id) => write!(f, "object@{}", id),
        }
    }
}

/// Method body expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Const(Value),
    /// Positional argument
    Arg(usize),
    /// The receiver of an instance method
    This,
    /// String concatenation of every operand
    Concat(Vec<Expr>),
    /// Integer addition
    Add(Box<Expr>, Box<Expr>),
    GetStatic { class: String, field: String },
    PutStatic {
        class: String,
        field: String,
        value: Box<Expr>,
    },
    /// Instance field of the receiver
    GetField { field: String },
    InvokeStatic {
        class: String,
        method: String,
        args: Vec<Expr>,
    },
    /// Evaluate in order, yield the last value
    Seq(Vec<Expr>),
}

/// An annotation on a method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationDef {
    /// Fully-qualified annotation type
    #[serde(rename = "type")]
    pub type_name: String,
    /// Element values
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// A declared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Raw access flags
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub is_static: bool,
}

/// A declared method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    /// Parameter type names (`int`, `String`, or a class name)
    #[serde(default)]
    pub params: Vec<String>,
    /// Raw access flags
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub annotations: Vec<AnnotationDef>,
    pub body: Expr,
}

/// One static-initializer assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticInit {
    pub field: String,
    pub value: Expr,
}

/// A class definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    /// Fully-qualified name
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
    /// Static initializer, run once on class initialization
    #[serde(default)]
    pub clinit: Vec<StaticInit>,
}

impl ClassDef {
    /// Empty class named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            methods: Vec::new(),
            clinit: Vec::new(),
        }
    }

    /// Add a field
    pub fn field(mut self, name: &str, flags: AccessFlags) -> Self {
        self.fields.push(FieldDef {
            name: name.to_string(),
            flags: flags.bits(),
            is_static: flags.contains(AccessFlags::STATIC),
        });
        self
    }

    /// Add a static-initializer assignment
    pub fn init(mut self, field: &str, value: Expr) -> Self {
        self.clinit.push(StaticInit {
            field: field.to_string(),
            value,
        });
        self
    }

    /// Add a method
    pub fn method(mut self, name: &str, params: &[&str], flags: AccessFlags, body: Expr) -> Self {
        self.methods.push(MethodDef {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            flags: flags.bits(),
            is_static: flags.contains(AccessFlags::STATIC),
            annotations: Vec::new(),
            body,
        });
        self
    }

    /// Annotate the most recently added method
    pub fn annotate(mut self, type_name: &str, values: &[(&str, &str)]) -> Self {
        if let Some(method) = self.methods.last_mut() {
            method.annotations.push(AnnotationDef {
                type_name: type_name.to_string(),
                values: values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
        self
    }

    /// Mark the most recently added method as replacing `clazz.method`
    pub fn replaces(self, clazz: &str, method: &str) -> Self {
        self.annotate(
            splice_engine::vm::METHOD_REPLACE_ANNOTATION,
            &[("clazz", clazz), ("method", method)],
        )
    }
}

/// Shorthand constructors for bodies
pub mod expr {
    use super::{Expr, Value};

    pub fn int(i: i64) -> Expr {
        Expr::Const(Value::Int(i))
    }

    pub fn str(s: &str) -> Expr {
        Expr::Const(Value::Str(s.to_string()))
    }

    pub fn arg(i: usize) -> Expr {
        Expr::Arg(i)
    }

    pub fn concat(parts: Vec<Expr>) -> Expr {
        Expr::Concat(parts)
    }

    pub fn add(a: Expr, b: Expr) -> Expr {
        Expr::Add(Box::new(a), Box::new(b))
    }

    pub fn get_static(class: &str, field: &str) -> Expr {
        Expr::GetStatic {
            class: class.to_string(),
            field: field.to_string(),
        }
    }

    pub fn put_static(class: &str, field: &str, value: Expr) -> Expr {
        Expr::PutStatic {
            class: class.to_string(),
            field: field.to_string(),
            value: Box::new(value),
        }
    }

    pub fn get_field(field: &str) -> Expr {
        Expr::GetField {
            field: field.to_string(),
        }
    }

    pub fn invoke_static(class: &str, method: &str, args: Vec<Expr>) -> Expr {
        Expr::InvokeStatic {
            class: class.to_string(),
            method: method.to_string(),
            args,
        }
    }

    pub fn seq(exprs: Vec<Expr>) -> Expr {
        Expr::Seq(exprs)
    }
}
