//! Identities of types, methods and fields, and the constant values that appear in code.
//!
//! All identities are cheap to clone (reference counted strings) and totally ordered, so they
//! can be used as map keys and sorted to obtain deterministic iteration orders.

use std::{fmt, sync::Arc};

/// A fully qualified type name in dotted source form, e.g. `java.lang.String` or `int[]`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeName(Arc<str>);

const PRIMITIVES: &[&str] = &[
    "void", "boolean", "byte", "short", "char", "int", "long", "float", "double",
];

impl TypeName {
    /// Creates a type name from its dotted form.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        TypeName(Arc::from(name.as_ref()))
    }

    /// `java.lang.Object`
    #[must_use]
    pub fn object() -> Self {
        Self::new("java.lang.Object")
    }

    /// `java.lang.String`
    #[must_use]
    pub fn string() -> Self {
        Self::new("java.lang.String")
    }

    /// `void`
    #[must_use]
    pub fn void() -> Self {
        Self::new("void")
    }

    /// `int`
    #[must_use]
    pub fn int() -> Self {
        Self::new("int")
    }

    /// `long`
    #[must_use]
    pub fn long() -> Self {
        Self::new("long")
    }

    /// Returns the dotted name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for `void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        &*self.0 == "void"
    }

    /// Returns `true` for primitive types, including `void`.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        PRIMITIVES.contains(&&*self.0)
    }

    /// Returns `true` for array types.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.0.ends_with("[]")
    }

    /// Returns the element type of an array type.
    #[must_use]
    pub fn element_type(&self) -> Option<TypeName> {
        self.0.strip_suffix("[]").map(TypeName::new)
    }

    /// Returns the package of the type, empty for the default package and for primitives.
    ///
    /// Array types live in the package of their innermost element type.
    #[must_use]
    pub fn package(&self) -> &str {
        let base = self.0.trim_end_matches("[]");
        match base.rfind('.') {
            Some(index) => &base[..index],
            None => "",
        }
    }

    /// Returns the name without the package.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        match self.0.rfind('.') {
            Some(index) => &self.0[index + 1..],
            None => &self.0,
        }
    }

    /// Returns a new type name with `suffix` appended, e.g. `Foo` + `$-CC`.
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> TypeName {
        TypeName::new(format!("{}{}", self.0, suffix))
    }

    /// Returns the kind of register value holding an instance of this type.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match &*self.0 {
            "boolean" | "byte" | "short" | "char" | "int" => ValueType::Int,
            "long" => ValueType::Long,
            "float" => ValueType::Float,
            "double" => ValueType::Double,
            _ => ValueType::Reference,
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for TypeName {
    fn from(value: &str) -> Self {
        TypeName::new(value)
    }
}

/// The kind of value a register holds.
///
/// The register machine stores every value, wide or not, in a single register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    /// 32-bit integer and the smaller integral types
    Int,
    /// 64-bit integer
    Long,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Object or array reference, including `null`
    Reference,
}

impl ValueType {
    /// Returns the type name used when a value of this kind crosses a method boundary.
    #[must_use]
    pub fn type_name(self) -> TypeName {
        match self {
            ValueType::Int => TypeName::int(),
            ValueType::Long => TypeName::long(),
            ValueType::Float => TypeName::new("float"),
            ValueType::Double => TypeName::new("double"),
            ValueType::Reference => TypeName::object(),
        }
    }

    /// Returns the default value of the kind: `0`, `0L` or `null`.
    #[must_use]
    pub fn zero(self) -> ConstValue {
        match self {
            ValueType::Long => ConstValue::Long(0),
            ValueType::Reference => ConstValue::Null,
            ValueType::Int | ValueType::Float | ValueType::Double => ConstValue::Int(0),
        }
    }
}

/// A method prototype: return type and parameter types, without the receiver.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Proto {
    /// The return type, `void` for none
    pub return_type: TypeName,
    /// The declared parameter types
    pub parameters: Arc<[TypeName]>,
}

impl Proto {
    /// Creates a new prototype.
    #[must_use]
    pub fn new(return_type: TypeName, parameters: Vec<TypeName>) -> Self {
        Self {
            return_type,
            parameters: parameters.into(),
        }
    }

    /// `()void`
    #[must_use]
    pub fn void() -> Self {
        Self::new(TypeName::void(), Vec::new())
    }

    /// Returns the number of declared parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Returns a prototype with `receiver` prepended to the parameters.
    #[must_use]
    pub fn with_receiver(&self, receiver: TypeName) -> Self {
        let mut parameters = Vec::with_capacity(self.parameters.len() + 1);
        parameters.push(receiver);
        parameters.extend(self.parameters.iter().cloned());
        Self::new(self.return_type.clone(), parameters)
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (index, parameter) in self.parameters.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{parameter}")?;
        }
        write!(f, "){}", self.return_type)
    }
}

impl fmt::Debug for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// The stable identity of a method: declaring type, name and prototype.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    /// The declaring type
    pub holder: TypeName,
    /// The simple method name
    pub name: Arc<str>,
    /// The prototype
    pub proto: Proto,
}

impl MethodId {
    /// Creates a new method identity.
    #[must_use]
    pub fn new(holder: TypeName, name: impl AsRef<str>, proto: Proto) -> Self {
        Self {
            holder,
            name: Arc::from(name.as_ref()),
            proto,
        }
    }

    /// Parses the display form `holder.name(param,param)return`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dexopt::program::MethodId;
    ///
    /// let id = MethodId::parse("com.example.Foo.bar(int,long)void").unwrap();
    /// assert_eq!(id.holder.as_str(), "com.example.Foo");
    /// assert_eq!(&*id.name, "bar");
    /// assert_eq!(id.proto.arity(), 2);
    /// ```
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let open = text.find('(')?;
        let close = text.rfind(')')?;
        if close < open {
            return None;
        }
        let qualified = &text[..open];
        let dot = qualified.rfind('.')?;
        let holder = TypeName::new(&qualified[..dot]);
        let name = &qualified[dot + 1..];
        let parameters = text[open + 1..close]
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(TypeName::new)
            .collect();
        let return_type = TypeName::new(text[close + 1..].trim());
        if name.is_empty() || return_type.as_str().is_empty() {
            return None;
        }
        Some(Self::new(holder, name, Proto::new(return_type, parameters)))
    }

    /// Returns `holder.name`, the form matched by method filters.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.holder, self.name)
    }

    /// Returns `true` for instance and static initializers.
    #[must_use]
    pub fn is_initializer(&self) -> bool {
        &*self.name == "<init>" || &*self.name == "<clinit>"
    }

    /// Returns a copy of this identity on another holder.
    #[must_use]
    pub fn with_holder(&self, holder: TypeName) -> Self {
        Self {
            holder,
            name: self.name.clone(),
            proto: self.proto.clone(),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.holder, self.name, self.proto)
    }
}

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// The identity of a field: declaring type, name and field type.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId {
    /// The declaring type
    pub holder: TypeName,
    /// The field name
    pub name: Arc<str>,
    /// The type of the field
    pub ty: TypeName,
}

impl FieldId {
    /// Creates a new field identity.
    #[must_use]
    pub fn new(holder: TypeName, name: impl AsRef<str>, ty: TypeName) -> Self {
        Self {
            holder,
            name: Arc::from(name.as_ref()),
            ty,
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.holder, self.name, self.ty)
    }
}

impl fmt::Debug for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// A compile-time constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstValue {
    /// 32-bit integer (also used for booleans, bytes, shorts and chars)
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// String literal
    String(Arc<str>),
    /// Class literal
    Type(TypeName),
    /// The null reference
    Null,
}

impl ConstValue {
    /// Creates a string constant.
    #[must_use]
    pub fn string(value: impl AsRef<str>) -> Self {
        ConstValue::String(Arc::from(value.as_ref()))
    }

    /// Returns the register kind of the constant.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            ConstValue::Int(_) => ValueType::Int,
            ConstValue::Long(_) => ValueType::Long,
            ConstValue::String(_) | ConstValue::Type(_) | ConstValue::Null => {
                ValueType::Reference
            }
        }
    }

    /// Returns the value as a 64-bit integer for integral constants.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(i64::from(*v)),
            ConstValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string literal, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConstValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for `Int(0)`, `Long(0)` and `Null`.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        matches!(self, ConstValue::Int(0) | ConstValue::Long(0) | ConstValue::Null)
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::Long(v) => write!(f, "{v}L"),
            ConstValue::String(s) => write!(f, "{s:?}"),
            ConstValue::Type(t) => write!(f, "{t}.class"),
            ConstValue::Null => f.write_str("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_parts() {
        let ty = TypeName::new("com.example.util.Helper");
        assert_eq!(ty.package(), "com.example.util");
        assert_eq!(ty.simple_name(), "Helper");
        assert_eq!(TypeName::new("Main").package(), "");
        assert_eq!(TypeName::new("com.a.B[]").package(), "com.a");
        assert_eq!(
            TypeName::new("int[]").element_type(),
            Some(TypeName::int())
        );
        assert!(TypeName::new("char").is_primitive());
        assert_eq!(TypeName::new("short").value_type(), ValueType::Int);
    }

    #[test]
    fn test_method_id_round_trip_display() {
        let id = MethodId::parse("a.B.c(int, java.lang.String)long").unwrap();
        assert_eq!(id.to_string(), "a.B.c(int,java.lang.String)long");
        assert_eq!(id.qualified_name(), "a.B.c");
        assert!(MethodId::parse("nodot(int)void").is_none());
        assert!(MethodId::parse("a.B.c(").is_none());
    }

    #[test]
    fn test_method_ids_order_by_holder_first() {
        let a = MethodId::parse("a.A.z()void").unwrap();
        let b = MethodId::parse("a.B.a()void").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_const_value_types() {
        assert_eq!(ConstValue::Long(1).value_type(), ValueType::Long);
        assert_eq!(ConstValue::string("x").value_type(), ValueType::Reference);
        assert!(ConstValue::Null.is_zero());
        assert_eq!(ConstValue::Int(-3).as_i64(), Some(-3));
    }
}
