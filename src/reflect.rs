//! Static reflection over component field layouts
//!
//! Each reflectable type exposes a `'static` [`TypeLayout`]: ordered field
//! records with name, offset, size, and a type tag. The registry additionally
//! captures one default-constructed byte snapshot per registered type, which
//! powers [`TypeRegistry::diff_with_default`] — the dirty-field bitmask used
//! by prefab overrides and inspectors.
//!
//! Layouts are generated by the [`reflect_struct!`] macro; there is no
//! runtime field discovery.

use ahash::AHashMap;

use crate::component::{Component, ComponentInfo, TypeId};
use crate::error::{EcsError, Result};

/// Type tag of a reflected field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Nested reflectable struct; `FieldInfo::nested` carries its layout.
    Struct,
}

/// One field of a reflected struct.
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
    pub kind: FieldKind,
    pub nested: Option<fn() -> &'static TypeLayout>,
}

/// Static layout of a reflectable type.
#[derive(Debug)]
pub struct TypeLayout {
    pub type_name: &'static str,
    pub size: usize,
    pub fields: &'static [FieldInfo],
}

/// Types with a macro-generated static layout.
pub trait Reflectable: Component {
    fn layout() -> &'static TypeLayout;
}

/// Maps field types to their tag. Implemented for primitives here and
/// generated for reflected structs by [`reflect_struct!`], so nested fields
/// need no special syntax.
pub trait ReflectField {
    const KIND: FieldKind;
    const NESTED: Option<fn() -> &'static TypeLayout> = None;
}

macro_rules! impl_reflect_field {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl ReflectField for $ty {
                const KIND: FieldKind = FieldKind::$kind;
            }
        )*
    };
}

impl_reflect_field!(
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

/// Generate [`Reflectable`] and [`ReflectField`] impls with a static field
/// layout. Nested reflected structs work as plain field types.
///
/// ```ignore
/// reflect_struct!(Position { x: f32, y: f32, z: f32 });
/// reflect_struct!(Transform { position: Position, scale: f32 });
/// ```
#[macro_export]
macro_rules! reflect_struct {
    ($ty:ty { $($field:ident: $fty:ty),* $(,)? }) => {
        impl $crate::reflect::Reflectable for $ty {
            fn layout() -> &'static $crate::reflect::TypeLayout {
                static LAYOUT: $crate::reflect::TypeLayout = $crate::reflect::TypeLayout {
                    type_name: stringify!($ty),
                    size: ::std::mem::size_of::<$ty>(),
                    fields: &[$(
                        $crate::reflect::FieldInfo {
                            name: stringify!($field),
                            offset: ::std::mem::offset_of!($ty, $field),
                            size: ::std::mem::size_of::<$fty>(),
                            kind: <$fty as $crate::reflect::ReflectField>::KIND,
                            nested: <$fty as $crate::reflect::ReflectField>::NESTED,
                        }
                    ),*],
                };
                &LAYOUT
            }
        }

        impl $crate::reflect::ReflectField for $ty {
            const KIND: $crate::reflect::FieldKind = $crate::reflect::FieldKind::Struct;
            const NESTED: Option<fn() -> &'static $crate::reflect::TypeLayout> =
                Some(<$ty as $crate::reflect::Reflectable>::layout);
        }
    };
}

struct Registration {
    layout: &'static TypeLayout,
    info: ComponentInfo,
    /// Byte snapshot of one default-constructed instance.
    default_bytes: Box<[u8]>,
}

/// Registry of reflectable types with captured default snapshots.
pub struct TypeRegistry {
    registrations: AHashMap<TypeId, Registration>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            registrations: AHashMap::new(),
        }
    }

    /// Register a type and capture its default instance.
    ///
    /// Fails when the layout declares more than 64 fields; the diff mask
    /// cannot name them individually.
    pub fn register<T: Reflectable + Default>(&mut self) -> Result<()> {
        let layout = T::layout();
        if layout.fields.len() > 64 {
            tracing::error!(
                type_name = layout.type_name,
                fields = layout.fields.len(),
                "reflected type exceeds diff mask width"
            );
            return Err(EcsError::TooManyFields {
                type_name: layout.type_name,
                fields: layout.fields.len(),
            });
        }

        let default = T::default();
        let bytes = unsafe {
            std::slice::from_raw_parts(&default as *const T as *const u8, std::mem::size_of::<T>())
        };
        self.registrations.insert(
            TypeId::of::<T>(),
            Registration {
                layout,
                info: ComponentInfo::of::<T>(),
                default_bytes: bytes.to_vec().into_boxed_slice(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.registrations.contains_key(&type_id)
    }

    pub fn layout(&self, type_id: TypeId) -> Option<&'static TypeLayout> {
        self.registrations.get(&type_id).map(|r| r.layout)
    }

    pub fn component_info(&self, type_id: TypeId) -> Option<&ComponentInfo> {
        self.registrations.get(&type_id).map(|r| &r.info)
    }

    /// Bitmask of fields whose bytes differ from the default instance.
    /// Bit i covers field i.
    ///
    /// # Safety
    /// `instance` must point to a valid value of the registered type.
    pub unsafe fn diff_with_default(&self, type_id: TypeId, instance: *const u8) -> Option<u64> {
        let registration = self.registrations.get(&type_id)?;
        let mut mask = 0u64;
        for (i, field) in registration.layout.fields.iter().enumerate() {
            let instance_bytes =
                std::slice::from_raw_parts(instance.add(field.offset), field.size);
            let default_bytes =
                &registration.default_bytes[field.offset..field.offset + field.size];
            if instance_bytes != default_bytes {
                mask |= 1u64 << i;
            }
        }
        Some(mask)
    }

    /// Typed convenience over [`TypeRegistry::diff_with_default`].
    pub fn diff<T: Reflectable>(&self, instance: &T) -> Option<u64> {
        unsafe { self.diff_with_default(TypeId::of::<T>(), instance as *const T as *const u8) }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
