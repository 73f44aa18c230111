//! Classes and fields.

use crate::program::{ConstValue, EncodedMethod, FieldId, MethodId, TypeName};

bitflags::bitflags! {
    /// Class access and property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u32 {
        /// Accessible from everywhere
        const PUBLIC = 0x0001;
        /// Cannot be subclassed
        const FINAL = 0x0010;
        /// Interface type
        const INTERFACE = 0x0200;
        /// Cannot be instantiated
        const ABSTRACT = 0x0400;
        /// Generated by a compiler
        const SYNTHETIC = 0x1000;
    }
}

bitflags::bitflags! {
    /// Field access and property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldFlags: u32 {
        /// Accessible from everywhere
        const PUBLIC = 0x0001;
        /// Accessible only from the declaring class
        const PRIVATE = 0x0002;
        /// Accessible from the package and subclasses
        const PROTECTED = 0x0004;
        /// Class field
        const STATIC = 0x0008;
        /// Assigned once
        const FINAL = 0x0010;
        /// Not present in source
        const SYNTHETIC = 0x1000;
    }
}

/// A field definition.
#[derive(Debug, Clone)]
pub struct EncodedField {
    /// Identity
    pub id: FieldId,
    /// Access flags
    pub flags: FieldFlags,
    /// Compile-time initial value of a static field
    pub static_value: Option<ConstValue>,
}

impl EncodedField {
    /// Creates a field without an initial value.
    #[must_use]
    pub fn new(id: FieldId, flags: FieldFlags) -> Self {
        Self {
            id,
            flags,
            static_value: None,
        }
    }

    /// Returns `true` for `static final` fields carrying a constant.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC | FieldFlags::FINAL) && self.static_value.is_some()
    }
}

/// A class defined by the program.
#[derive(Debug, Clone)]
pub struct ProgramClass {
    /// The class type
    pub ty: TypeName,
    /// Direct superclass, `None` only for the root of the hierarchy
    pub superclass: Option<TypeName>,
    /// Directly implemented interfaces
    pub interfaces: Vec<TypeName>,
    /// Access flags
    pub flags: ClassFlags,
    /// Static methods, constructors and private instance methods
    pub direct_methods: Vec<EncodedMethod>,
    /// Overridable instance methods
    pub virtual_methods: Vec<EncodedMethod>,
    /// Static and instance fields
    pub fields: Vec<EncodedField>,
}

impl ProgramClass {
    /// Creates an empty class extending `java.lang.Object`.
    #[must_use]
    pub fn new(ty: TypeName, flags: ClassFlags) -> Self {
        Self {
            ty,
            superclass: Some(TypeName::object()),
            interfaces: Vec::new(),
            flags,
            direct_methods: Vec::new(),
            virtual_methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Returns `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    /// Adds a method to the direct or virtual table, depending on its flags.
    pub fn add_method(&mut self, method: EncodedMethod) {
        if method.is_virtual() {
            self.virtual_methods.push(method);
        } else {
            self.direct_methods.push(method);
        }
    }

    /// Iterates the direct methods, then the virtual methods.
    pub fn methods(&self) -> impl Iterator<Item = &EncodedMethod> {
        self.direct_methods.iter().chain(&self.virtual_methods)
    }

    /// Mutable counterpart of [`ProgramClass::methods`].
    pub fn methods_mut(&mut self) -> impl Iterator<Item = &mut EncodedMethod> {
        self.direct_methods
            .iter_mut()
            .chain(self.virtual_methods.iter_mut())
    }

    /// Looks up a method by identity.
    #[must_use]
    pub fn method(&self, id: &MethodId) -> Option<&EncodedMethod> {
        self.methods().find(|m| &m.id == id)
    }

    /// Looks up a method mutably by identity.
    pub fn method_mut(&mut self, id: &MethodId) -> Option<&mut EncodedMethod> {
        self.methods_mut().find(|m| &m.id == id)
    }

    /// Removes a method, returning it if present.
    pub fn remove_method(&mut self, id: &MethodId) -> Option<EncodedMethod> {
        for table in [&mut self.direct_methods, &mut self.virtual_methods] {
            if let Some(index) = table.iter().position(|m| &m.id == id) {
                return Some(table.remove(index));
            }
        }
        None
    }

    /// Looks up a field by identity.
    #[must_use]
    pub fn field(&self, id: &FieldId) -> Option<&EncodedField> {
        self.fields.iter().find(|f| &f.id == id)
    }

    /// Returns `true` if the class has a static initializer.
    #[must_use]
    pub fn has_class_initializer(&self) -> bool {
        self.direct_methods
            .iter()
            .any(|m| &*m.id.name == "<clinit>")
    }
}
