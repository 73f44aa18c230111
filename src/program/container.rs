//! The whole-program container.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::{
    program::{EncodedField, EncodedMethod, FieldId, InvokeKind, MethodId, ProgramClass, TypeName},
    Result,
};

/// Maps enum ordinals to the case keys of a compiler generated switch map, e.g. the contents of
/// `Outer$1.$SwitchMap$pkg$Color`.
pub type SwitchMap = BTreeMap<i32, i32>;

/// An ordered collection of program classes.
///
/// Class order is significant: it is the order in which methods are visited, events are
/// reported and output is produced. Types that are referenced but not defined are library
/// types.
#[derive(Debug, Clone, Default)]
pub struct Program {
    classes: Vec<ProgramClass>,
    index: HashMap<TypeName, usize>,
    switch_maps: HashMap<FieldId, SwitchMap>,
}

impl Program {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a class.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a class with the same type already exists.
    pub fn add_class(&mut self, class: ProgramClass) -> Result<()> {
        if self.index.contains_key(&class.ty) {
            return Err(malformed_error!("Duplicate definition of class {}", class.ty));
        }
        self.index.insert(class.ty.clone(), self.classes.len());
        self.classes.push(class);
        Ok(())
    }

    /// Returns the classes in program order.
    #[must_use]
    pub fn classes(&self) -> &[ProgramClass] {
        &self.classes
    }

    /// Returns the classes mutably. Class types must not be changed through this slice.
    pub fn classes_mut(&mut self) -> &mut [ProgramClass] {
        &mut self.classes
    }

    /// Returns the number of classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Returns the program definition of `ty`, `None` for library types.
    #[must_use]
    pub fn definition_for(&self, ty: &TypeName) -> Option<&ProgramClass> {
        self.index.get(ty).map(|&i| &self.classes[i])
    }

    /// Mutable counterpart of [`Program::definition_for`].
    pub fn definition_for_mut(&mut self, ty: &TypeName) -> Option<&mut ProgramClass> {
        match self.index.get(ty) {
            Some(&i) => Some(&mut self.classes[i]),
            None => None,
        }
    }

    /// Returns `true` if `ty` is defined by the program.
    #[must_use]
    pub fn is_program_type(&self, ty: &TypeName) -> bool {
        self.index.contains_key(ty)
    }

    /// Looks up a method definition by exact identity.
    #[must_use]
    pub fn method(&self, id: &MethodId) -> Option<&EncodedMethod> {
        self.definition_for(&id.holder)?.method(id)
    }

    /// Looks up a method definition mutably by exact identity.
    pub fn method_mut(&mut self, id: &MethodId) -> Option<&mut EncodedMethod> {
        self.definition_for_mut(&id.holder)?.method_mut(id)
    }

    /// Looks up a field definition by exact identity.
    #[must_use]
    pub fn field(&self, id: &FieldId) -> Option<&EncodedField> {
        self.definition_for(&id.holder)?.field(id)
    }

    /// Returns every method identity in program order.
    #[must_use]
    pub fn method_ids(&self) -> Vec<MethodId> {
        self.classes
            .iter()
            .flat_map(|c| c.methods().map(|m| m.id.clone()))
            .collect()
    }

    /// Iterates every method in program order.
    pub fn methods(&self) -> impl Iterator<Item = &EncodedMethod> {
        self.classes.iter().flat_map(ProgramClass::methods)
    }

    /// Iterates every method mutably in program order.
    pub fn methods_mut(&mut self) -> impl Iterator<Item = &mut EncodedMethod> {
        self.classes.iter_mut().flat_map(ProgramClass::methods_mut)
    }

    /// Finds the definition a reference resolves to by walking up the superclass chain.
    ///
    /// Returns `None` when the chain leaves the program before a definition is found.
    #[must_use]
    pub fn lookup_method(&self, id: &MethodId) -> Option<&EncodedMethod> {
        let mut current = Some(id.holder.clone());
        while let Some(ty) = current {
            let class = self.definition_for(&ty)?;
            let candidate = id.with_holder(ty);
            if let Some(method) = class.method(&candidate) {
                return Some(method);
            }
            current = class.superclass.clone();
        }
        None
    }

    /// Resolves the single statically known target of an invoke, if there is one.
    ///
    /// Static, direct and super invokes resolve to the definition found on the superclass
    /// chain. Virtual and interface invokes resolve only when no program subtype overrides the
    /// resolved method.
    #[must_use]
    pub fn single_target(&self, kind: InvokeKind, id: &MethodId) -> Option<MethodId> {
        let resolved = self.lookup_method(id)?;
        match kind {
            InvokeKind::Static | InvokeKind::Direct | InvokeKind::Super => {
                Some(resolved.id.clone())
            }
            InvokeKind::Virtual | InvokeKind::Interface => {
                if self.overriding_methods(&resolved.id).is_empty() {
                    Some(resolved.id.clone())
                } else {
                    None
                }
            }
        }
    }

    /// Returns every possible target of an invoke that is defined by the program.
    #[must_use]
    pub fn possible_targets(&self, kind: InvokeKind, id: &MethodId) -> Vec<MethodId> {
        let mut targets = Vec::new();
        if let Some(resolved) = self.lookup_method(id) {
            targets.push(resolved.id.clone());
        }
        if matches!(kind, InvokeKind::Virtual | InvokeKind::Interface) {
            targets.extend(self.overriding_methods(id));
        }
        targets.sort();
        targets.dedup();
        targets
    }

    /// Returns the methods in program subtypes of `id.holder` that have the same name and
    /// prototype as `id`, in program order.
    #[must_use]
    pub fn overriding_methods(&self, id: &MethodId) -> Vec<MethodId> {
        self.subtypes(&id.holder)
            .into_iter()
            .filter_map(|ty| {
                let candidate = id.with_holder(ty);
                self.method(&candidate)
                    .filter(|m| m.is_virtual())
                    .map(|m| m.id.clone())
            })
            .collect()
    }

    /// Returns the transitive program subtypes of `ty` (classes and interfaces), excluding `ty`.
    #[must_use]
    pub fn subtypes(&self, ty: &TypeName) -> Vec<TypeName> {
        let mut result = Vec::new();
        let mut queue = VecDeque::from([ty.clone()]);
        while let Some(current) = queue.pop_front() {
            for class in &self.classes {
                let is_direct = class.superclass.as_ref() == Some(&current)
                    || class.interfaces.contains(&current);
                if is_direct && !result.contains(&class.ty) && &class.ty != ty {
                    result.push(class.ty.clone());
                    queue.push_back(class.ty.clone());
                }
            }
        }
        result
    }

    /// Returns `base` if no class of that name exists, otherwise the first of `base1`, `base2`,
    /// ... that is free.
    #[must_use]
    pub fn fresh_type_name(&self, base: &str) -> TypeName {
        let candidate = TypeName::new(base);
        if !self.is_program_type(&candidate) {
            return candidate;
        }
        let mut suffix = 1usize;
        loop {
            let candidate = TypeName::new(format!("{base}{suffix}"));
            if !self.is_program_type(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Registers the switch map stored in `field`.
    pub fn add_switch_map(&mut self, field: FieldId, map: SwitchMap) {
        self.switch_maps.insert(field, map);
    }

    /// Returns the switch map stored in `field`.
    #[must_use]
    pub fn switch_map(&self, field: &FieldId) -> Option<&SwitchMap> {
        self.switch_maps.get(field)
    }

    /// Returns the lexicographically highest string literal referenced by any method.
    #[must_use]
    pub fn highest_sorting_string(&self) -> Option<&str> {
        self.methods()
            .filter_map(|m| m.code.as_ref()?.highest_string())
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ClassFlags, MethodFlags, Proto};

    fn class_with(ty: &str, superclass: &str, methods: &[&str]) -> ProgramClass {
        let mut class = ProgramClass::new(TypeName::new(ty), ClassFlags::PUBLIC);
        class.superclass = Some(TypeName::new(superclass));
        for name in methods {
            let id = MethodId::new(TypeName::new(ty), name, Proto::void());
            class.add_method(EncodedMethod::new(id, MethodFlags::PUBLIC, None));
        }
        class
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut program = Program::new();
        program.add_class(class_with("a.A", "java.lang.Object", &[])).unwrap();
        assert!(program
            .add_class(class_with("a.A", "java.lang.Object", &[]))
            .is_err());
    }

    #[test]
    fn test_single_target_and_overrides() {
        let mut program = Program::new();
        program
            .add_class(class_with("a.Base", "java.lang.Object", &["run", "only"]))
            .unwrap();
        program.add_class(class_with("a.Sub", "a.Base", &["run"])).unwrap();

        let run = MethodId::new(TypeName::new("a.Base"), "run", Proto::void());
        let only = MethodId::new(TypeName::new("a.Sub"), "only", Proto::void());

        assert_eq!(program.single_target(InvokeKind::Virtual, &run), None);
        assert_eq!(program.possible_targets(InvokeKind::Virtual, &run).len(), 2);
        assert_eq!(
            program.single_target(InvokeKind::Virtual, &only),
            Some(MethodId::new(TypeName::new("a.Base"), "only", Proto::void()))
        );
    }

    #[test]
    fn test_fresh_type_name() {
        let mut program = Program::new();
        assert_eq!(program.fresh_type_name("x.Y").as_str(), "x.Y");
        program.add_class(class_with("x.Y", "java.lang.Object", &[])).unwrap();
        program.add_class(class_with("x.Y1", "java.lang.Object", &[])).unwrap();
        assert_eq!(program.fresh_type_name("x.Y").as_str(), "x.Y2");
    }
}
