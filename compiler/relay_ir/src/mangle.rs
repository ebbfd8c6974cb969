//! Symbol mangling for every entity the thunk generator defines.
//!
//! Resilient clients link against these names instead of table offsets,
//! so a name must depend only on the method reference it denotes, never
//! on declaration order or emission order.
//!
//! # Mangling Scheme
//!
//! ```text
//! _relay_<module>$<owner>[$<selector>$<signature>]$<entity>[$<entity>]
//! ```
//!
//! - `<signature>` starts with three letters: owner kind (`c` class, `p`
//!   protocol), method kind (`i` instance, `s` static) and convention
//!   (`o` ordinary, `a` async, `y` yield-once coroutine). Parameter types
//!   follow, then `_`, the result type, an optional `t<error>` and an
//!   optional `g<params>r<requirements>` generic suffix.
//! - `<entity>` is a two-letter code: `Tj` dispatch thunk, `Tq` method
//!   descriptor, `Tu` async function pointer, `Mu` method lookup function,
//!   `Mn` type context descriptor, `Mo` vtable bounds variable. `Tu`
//!   follows the code of the function it points to.
//!
//! | Entity | Mangled Name |
//! |--------|--------------|
//! | dispatch thunk for `geo.Shape.area() -> f64` | `_relay_geo$Shape$area$pio_d$Tj` |
//! | its method descriptor | `_relay_geo$Shape$area$pio_d$Tq` |
//! | method lookup function of `geo.Circle` | `_relay_geo$Circle$Mu` |
//!
//! Types encode as: `v` unit, `b` i8, `h` i16, `i` i32, `l` i64, `f` f32,
//! `d` f64, `p` pointer, `T…E` tuple, `C<len><name>` class instance,
//! `M<len><name>` metatype, `P<len><name>` protocol receiver, `G<n>_`
//! generic parameter.
//!
//! Identifier bytes other than ASCII alphanumerics and `_` become `.xx`
//! hex escapes, so `my-lib` mangles as `my.2dlib`.

use std::fmt::Write;

use crate::method::{CallingConventionKind, DeclContext, MethodKind, MethodReference};
use crate::types::{ScalarKind, TypeId, TypeKind, TypePool};
use crate::{Name, StringInterner};

/// The prefix for all Relay mangled symbols.
pub const MANGLE_PREFIX: &str = "_relay_";

/// Separator between path segments.
const SEP: char = '$';

/// Introduces a two-digit hex escape for one byte of an identifier.
const ESCAPE: char = '.';

/// Kind of entity a symbol names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    DispatchThunk,
    MethodDescriptor,
    MethodLookupFunction,
    TypeContextDescriptor,
    VTableBounds,
}

impl EntityKind {
    const fn code(self) -> &'static str {
        match self {
            EntityKind::DispatchThunk => "Tj",
            EntityKind::MethodDescriptor => "Tq",
            EntityKind::MethodLookupFunction => "Mu",
            EntityKind::TypeContextDescriptor => "Mn",
            EntityKind::VTableBounds => "Mo",
        }
    }
}

/// Code appended to a function symbol to name its async function pointer.
const ASYNC_POINTER_CODE: &str = "Tu";

/// Symbol mangler for generating linker names.
pub struct Mangler<'a> {
    interner: &'a StringInterner,
    pool: &'a TypePool,
}

impl<'a> Mangler<'a> {
    pub fn new(interner: &'a StringInterner, pool: &'a TypePool) -> Self {
        Self { interner, pool }
    }

    /// Mangle the dispatch thunk of `method`.
    #[must_use]
    pub fn dispatch_thunk(&self, method: &MethodReference) -> String {
        self.method_entity(method, EntityKind::DispatchThunk)
    }

    /// Mangle the method descriptor of `method`.
    #[must_use]
    pub fn method_descriptor(&self, method: &MethodReference) -> String {
        self.method_entity(method, EntityKind::MethodDescriptor)
    }

    /// Mangle the symbol of a concrete implementation of `method` provided
    /// by `implementor` (a class, or the conforming type of a witness).
    #[must_use]
    pub fn implementation(&self, method: &MethodReference, implementor: Name) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(MANGLE_PREFIX);
        self.encode_identifier(&mut out, self.interner.lookup(method.module));
        out.push(SEP);
        self.encode_identifier(&mut out, self.interner.lookup(implementor));
        out.push(SEP);
        self.encode_identifier(&mut out, self.interner.lookup(method.selector));
        out.push(SEP);
        self.encode_signature(&mut out, method);
        out
    }

    /// Mangle a per-class entity (lookup function, descriptor, bounds).
    #[must_use]
    pub fn class_entity(&self, module: Name, class: Name, entity: EntityKind) -> String {
        let mut out = String::with_capacity(48);
        out.push_str(MANGLE_PREFIX);
        self.encode_identifier(&mut out, self.interner.lookup(module));
        out.push(SEP);
        self.encode_identifier(&mut out, self.interner.lookup(class));
        out.push(SEP);
        out.push_str(entity.code());
        out
    }

    /// Mangle the async function pointer record of an already mangled
    /// function symbol.
    #[must_use]
    pub fn async_function_pointer(function_symbol: &str) -> String {
        let mut out = String::with_capacity(function_symbol.len() + 3);
        out.push_str(function_symbol);
        out.push(SEP);
        out.push_str(ASYNC_POINTER_CODE);
        out
    }

    fn method_entity(&self, method: &MethodReference, entity: EntityKind) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(MANGLE_PREFIX);
        self.encode_identifier(&mut out, self.interner.lookup(method.module));
        out.push(SEP);
        self.encode_identifier(&mut out, self.interner.lookup(method.owner.name()));
        out.push(SEP);
        self.encode_identifier(&mut out, self.interner.lookup(method.selector));
        out.push(SEP);
        self.encode_signature(&mut out, method);
        out.push(SEP);
        out.push_str(entity.code());
        out
    }

    fn encode_signature(&self, out: &mut String, method: &MethodReference) {
        let sig = &method.signature;
        out.push(match method.owner {
            DeclContext::Class(_) => 'c',
            DeclContext::Protocol(_) => 'p',
        });
        out.push(match method.kind {
            MethodKind::Instance => 'i',
            MethodKind::Static => 's',
        });
        out.push(match sig.convention {
            CallingConventionKind::Ordinary => 'o',
            CallingConventionKind::Asynchronous => 'a',
            CallingConventionKind::YieldingCoroutine => 'y',
        });
        for &param in &sig.params {
            self.encode_type(out, param);
        }
        out.push('_');
        self.encode_type(out, sig.result);
        if let Some(error) = sig.error {
            out.push('t');
            self.encode_type(out, error);
        }
        if !sig.generics.is_empty() {
            let _ = write!(
                out,
                "g{}r{}",
                sig.generics.params, sig.generics.requirements
            );
        }
    }

    fn encode_type(&self, out: &mut String, ty: TypeId) {
        match self.pool.kind(ty) {
            TypeKind::Unit => out.push('v'),
            TypeKind::Scalar(kind) => out.push(match kind {
                ScalarKind::I8 => 'b',
                ScalarKind::I16 => 'h',
                ScalarKind::I32 => 'i',
                ScalarKind::I64 => 'l',
                ScalarKind::F32 => 'f',
                ScalarKind::F64 => 'd',
                ScalarKind::Ptr => 'p',
            }),
            TypeKind::Tuple(elements) => {
                out.push('T');
                for e in elements {
                    self.encode_type(out, e);
                }
                out.push('E');
            }
            TypeKind::Object(class) => self.encode_nominal(out, 'C', class),
            TypeKind::Metatype(class) => self.encode_nominal(out, 'M', class),
            TypeKind::ProtocolSelf(protocol) => self.encode_nominal(out, 'P', protocol),
            TypeKind::Generic(n) => {
                let _ = write!(out, "G{n}_");
            }
        }
    }

    fn encode_nominal(&self, out: &mut String, tag: char, name: Name) {
        let mut encoded = String::new();
        self.encode_identifier(&mut encoded, self.interner.lookup(name));
        let _ = write!(out, "{tag}{}{encoded}", encoded.len());
    }

    /// Encode an identifier: alphanumerics and `_` pass through, every
    /// other UTF-8 byte becomes a `.xx` hex escape.
    #[expect(clippy::unused_self, reason = "keeps all encoders on the mangler")]
    fn encode_identifier(&self, out: &mut String, name: &str) {
        for b in name.bytes() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                out.push(char::from(b));
            } else {
                let _ = write!(out, "{ESCAPE}{b:02x}");
            }
        }
    }
}

/// Demangle a Relay symbol into a readable description.
///
/// Returns `None` for names without the Relay prefix or without a known
/// entity code.
///
/// - `_relay_geo$Shape$area$pio_d$Tj` → `dispatch thunk for geo.Shape.area`
/// - `_relay_geo$Shape$area$pio_d$Tj$Tu` →
///   `async function pointer to dispatch thunk for geo.Shape.area`
/// - `_relay_geo$Circle$Mu` → `method lookup function for geo.Circle`
/// - `_relay_geo.2ecore$Circle$Mu` →
///   `method lookup function for geo.core.Circle`
#[must_use]
pub fn demangle(mangled: &str) -> Option<String> {
    let rest = mangled.strip_prefix(MANGLE_PREFIX)?;
    let mut segments: Vec<&str> = rest.split(SEP).collect();

    let mut prefixes = Vec::new();
    if segments.last() == Some(&ASYNC_POINTER_CODE) {
        segments.pop();
        prefixes.push("async function pointer to ");
    }

    let entity = segments.pop()?;
    let (description, path_len) = match entity {
        "Tj" => ("dispatch thunk for ", 3),
        "Tq" => ("method descriptor for ", 3),
        "Mu" => ("method lookup function for ", 2),
        "Mn" => ("nominal type descriptor for ", 2),
        "Mo" => ("class metadata base offset for ", 2),
        _ => return None,
    };
    if segments.len() < path_len {
        return None;
    }

    let path = segments[..path_len]
        .iter()
        .map(|segment| decode_identifier(segment))
        .collect::<Option<Vec<_>>>()?;

    let mut out = String::new();
    for p in prefixes {
        out.push_str(p);
    }
    out.push_str(description);
    out.push_str(&path.join("."));
    Some(out)
}

/// Undo the `.xx` escapes of an encoded identifier. `None` if an escape is
/// truncated, not hex, or the bytes are not UTF-8.
fn decode_identifier(encoded: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut rest = encoded.as_bytes();
    while let Some((&b, tail)) = rest.split_first() {
        if char::from(b) == ESCAPE {
            let hex = std::str::from_utf8(tail.get(..2)?).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(b);
            rest = tail;
        }
    }
    String::from_utf8(bytes).ok()
}
