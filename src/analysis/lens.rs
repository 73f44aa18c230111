//! Persistent rewrite tables for renamed and retargeted program members.
//!
//! Whole-program transformations (class merging, member moves, interface companion classes)
//! do not rewrite every reference eagerly. Instead they push a [`GraphLens`] layer that maps
//! old identities to new ones; code that still refers to old identities is rewritten lazily
//! when a method is next processed, and the call graph resolves its edges through the lens.
//!
//! A lens is an immutable table plus a pointer to its parent. Lookups apply the oldest layer
//! first, so a member renamed twice resolves to its latest name. Cloning a lens is cheap.

use std::{collections::HashMap, sync::Arc};

use crate::program::{FieldId, MethodId, Proto, TypeName};

/// A chain of immutable rewrite tables.
///
/// # Examples
///
/// ```rust
/// use dexopt::analysis::GraphLens;
/// use dexopt::program::{MethodId, TypeName};
///
/// let old = MethodId::parse("a.A.run()void").unwrap();
/// let moved = MethodId::parse("b.B.run()void").unwrap();
///
/// let lens = GraphLens::builder().map_method(old.clone(), moved.clone()).build(&GraphLens::identity());
/// assert_eq!(lens.lookup_method(&old), moved);
/// assert!(!lens.is_identity());
/// ```
#[derive(Debug, Clone, Default)]
pub struct GraphLens {
    layer: Option<Arc<LensLayer>>,
}

#[derive(Debug)]
struct LensLayer {
    types: HashMap<TypeName, TypeName>,
    methods: HashMap<MethodId, MethodId>,
    fields: HashMap<FieldId, FieldId>,
    parent: GraphLens,
}

impl GraphLens {
    /// Returns the lens that maps everything to itself.
    #[must_use]
    pub const fn identity() -> Self {
        Self { layer: None }
    }

    /// Starts a new layer.
    #[must_use]
    pub fn builder() -> GraphLensBuilder {
        GraphLensBuilder::default()
    }

    /// Returns `true` if no layer has been pushed.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.layer.is_none()
    }

    /// Returns the number of layers in the chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let Some(layer) = &current.layer {
            depth += 1;
            current = &layer.parent;
        }
        depth
    }

    /// Returns the current name of `ty`.
    #[must_use]
    pub fn lookup_type(&self, ty: &TypeName) -> TypeName {
        let Some(layer) = &self.layer else {
            return ty.clone();
        };
        let previous = layer.parent.lookup_type(ty);
        layer.types.get(&previous).cloned().unwrap_or(previous)
    }

    /// Returns the current identity of `method`.
    ///
    /// An explicit method mapping wins; otherwise the holder and the prototype are rewritten
    /// through the type mappings.
    #[must_use]
    pub fn lookup_method(&self, method: &MethodId) -> MethodId {
        let Some(layer) = &self.layer else {
            return method.clone();
        };
        let previous = layer.parent.lookup_method(method);
        if let Some(mapped) = layer.methods.get(&previous) {
            return mapped.clone();
        }
        if layer.types.is_empty() {
            return previous;
        }
        let map = |ty: &TypeName| layer.types.get(ty).cloned().unwrap_or_else(|| ty.clone());
        MethodId::new(
            map(&previous.holder),
            &*previous.name,
            Proto::new(
                map(&previous.proto.return_type),
                previous.proto.parameters.iter().map(map).collect(),
            ),
        )
    }

    /// Returns the current identity of `field`.
    #[must_use]
    pub fn lookup_field(&self, field: &FieldId) -> FieldId {
        let Some(layer) = &self.layer else {
            return field.clone();
        };
        let previous = layer.parent.lookup_field(field);
        if let Some(mapped) = layer.fields.get(&previous) {
            return mapped.clone();
        }
        match (
            layer.types.get(&previous.holder),
            layer.types.get(&previous.ty),
        ) {
            (None, None) => previous,
            (holder, ty) => FieldId::new(
                holder.cloned().unwrap_or_else(|| previous.holder.clone()),
                &*previous.name,
                ty.cloned().unwrap_or_else(|| previous.ty.clone()),
            ),
        }
    }
}

/// Collects the mappings of one lens layer.
#[derive(Debug, Default)]
pub struct GraphLensBuilder {
    types: HashMap<TypeName, TypeName>,
    methods: HashMap<MethodId, MethodId>,
    fields: HashMap<FieldId, FieldId>,
}

impl GraphLensBuilder {
    /// Maps a type.
    #[must_use]
    pub fn map_type(mut self, from: TypeName, to: TypeName) -> Self {
        self.types.insert(from, to);
        self
    }

    /// Maps a method.
    #[must_use]
    pub fn map_method(mut self, from: MethodId, to: MethodId) -> Self {
        self.methods.insert(from, to);
        self
    }

    /// Maps a field.
    #[must_use]
    pub fn map_field(mut self, from: FieldId, to: FieldId) -> Self {
        self.fields.insert(from, to);
        self
    }

    /// Returns `true` if no mapping was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.methods.is_empty() && self.fields.is_empty()
    }

    /// Pushes the collected mappings on top of `parent`. An empty layer returns `parent`.
    #[must_use]
    pub fn build(self, parent: &GraphLens) -> GraphLens {
        if self.is_empty() {
            return parent.clone();
        }
        GraphLens {
            layer: Some(Arc::new(LensLayer {
                types: self.types,
                methods: self.methods,
                fields: self.fields,
                parent: parent.clone(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(text: &str) -> MethodId {
        MethodId::parse(text).unwrap()
    }

    #[test]
    fn test_identity() {
        let lens = GraphLens::identity();
        let m = method("a.A.f(int)int");
        assert!(lens.is_identity());
        assert_eq!(lens.depth(), 0);
        assert_eq!(lens.lookup_method(&m), m);
    }

    #[test]
    fn test_chain_applies_oldest_first() {
        let first = GraphLens::builder()
            .map_method(method("a.A.f()void"), method("a.A.g()void"))
            .build(&GraphLens::identity());
        let second = GraphLens::builder()
            .map_method(method("a.A.g()void"), method("b.B.h()void"))
            .build(&first);

        assert_eq!(second.depth(), 2);
        assert_eq!(second.lookup_method(&method("a.A.f()void")), method("b.B.h()void"));
        // The parent is unchanged.
        assert_eq!(first.lookup_method(&method("a.A.f()void")), method("a.A.g()void"));
    }

    #[test]
    fn test_type_mapping_rewrites_signatures() {
        let lens = GraphLens::builder()
            .map_type(TypeName::new("a.Old"), TypeName::new("a.New"))
            .build(&GraphLens::identity());

        assert_eq!(
            lens.lookup_method(&method("a.Old.make(a.Old,int)a.Old")),
            method("a.New.make(a.New,int)a.New")
        );
        let field = FieldId::new(TypeName::new("a.Old"), "next", TypeName::new("a.Old"));
        let mapped = lens.lookup_field(&field);
        assert_eq!(mapped.holder.as_str(), "a.New");
        assert_eq!(mapped.ty.as_str(), "a.New");
    }

    #[test]
    fn test_empty_layer_is_not_pushed() {
        let lens = GraphLens::builder().build(&GraphLens::identity());
        assert!(lens.is_identity());
    }
}
