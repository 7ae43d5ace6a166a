//! Parameter Declarations
//!
//! A provider declares its plain parameters explicitly. Each declaration
//! carries a type, a default, or both; a declaration with neither is rejected
//! when the graph is built.
//!
//! The types are the argument types a schema layer exposes to clients. They
//! render in GraphQL notation so the merged argument map can be emitted
//! directly.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The type of a request argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    Int,
    Float,
    String,
    Boolean,
    Id,
    Decimal,
    Date,
    DateTime,
    /// A custom scalar, enum or input object, by name.
    Named(String),
    List(Box<ArgType>),
    NonNull(Box<ArgType>),
}

impl ArgType {
    pub fn list(inner: ArgType) -> Self {
        Self::List(Box::new(inner))
    }

    /// Wrap this type as non-null. Already non-null types are returned as is.
    pub fn non_null(self) -> Self {
        match self {
            Self::NonNull(_) => self,
            other => Self::NonNull(Box::new(other)),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// Infer a type from a JSON default value.
    ///
    /// Returns `None` for `null`, for objects, and for empty arrays since
    /// nothing about their shape is known.
    pub fn infer(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value as Json;

        match value {
            Json::Bool(_) => Some(Self::Boolean),
            Json::Number(n) if n.is_i64() || n.is_u64() => Some(Self::Int),
            Json::Number(_) => Some(Self::Float),
            Json::String(_) => Some(Self::String),
            Json::Array(items) => items.first().and_then(Self::infer).map(Self::list),
            Json::Null | Json::Object(_) => None,
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("Int"),
            Self::Float => f.write_str("Float"),
            Self::String => f.write_str("String"),
            Self::Boolean => f.write_str("Boolean"),
            Self::Id => f.write_str("ID"),
            Self::Decimal => f.write_str("Decimal"),
            Self::Date => f.write_str("Date"),
            Self::DateTime => f.write_str("DateTime"),
            Self::Named(name) => f.write_str(name),
            Self::List(inner) => write!(f, "[{inner}]"),
            Self::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

/// Declaration of one plain parameter.
///
/// ```rust
/// use trellis_core::{ArgType, ParamDecl};
///
/// let limit = ParamDecl::default_value(20).describe("page size");
/// assert_eq!(limit.resolved_type(), Some(ArgType::Int));
///
/// let id = ParamDecl::typed(ArgType::Id.non_null());
/// assert!(id.is_required());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    ty: Option<ArgType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl ParamDecl {
    /// An empty declaration. It must be given a type or a default before the
    /// graph is built.
    pub fn new() -> Self {
        Self::default()
    }

    /// A declaration with a type and no default. The argument is required.
    pub fn typed(ty: ArgType) -> Self {
        Self::new().with_type(ty)
    }

    /// A declaration with a default. The type is inferred from the default
    /// unless one is set explicitly.
    pub fn default_value(default: impl Into<serde_json::Value>) -> Self {
        Self::new().with_default(default)
    }

    pub fn with_type(mut self, ty: ArgType) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn with_default(mut self, default: impl Into<serde_json::Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The declared type, or the one inferred from the default.
    pub fn resolved_type(&self) -> Option<ArgType> {
        self.ty
            .clone()
            .or_else(|| self.default.as_ref().and_then(ArgType::infer))
    }

    pub fn default_json(&self) -> Option<&serde_json::Value> {
        self.default.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// A parameter without a default must be supplied by every request.
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    /// Fill in the inferred type. Returns `None` when no type can be
    /// determined, which makes the declaration malformed.
    pub(crate) fn normalized(&self) -> Option<Self> {
        let ty = self.resolved_type()?;
        Some(Self {
            ty: Some(ty),
            default: self.default.clone(),
            description: self.description.clone(),
        })
    }
}
