//! Shared fixtures for thunk emission tests.

use std::sync::Arc;

use relay_abi::{
    ClassDecl, Conformance, LayoutConfig, MethodDecl, ModuleMetadata, ProtocolDecl, TargetLayout,
};
use relay_ir::{
    CallingConventionKind, DeclContext, FunctionSignature, GenericSignature, Instr, MethodKind,
    MethodReference, Name, SharedInterner, StringInterner, ThunkFunction, TypeId, TypePool,
    Visibility,
};

use crate::{Services, ThunkModule, ThunkOptions};

pub(crate) struct Env {
    pub interner: SharedInterner,
    pub types: Arc<TypePool>,
}

impl Env {
    pub fn new() -> Self {
        Self {
            interner: StringInterner::shared(),
            types: Arc::new(TypePool::new()),
        }
    }

    pub fn name(&self, s: &str) -> Name {
        self.interner.intern(s)
    }

    pub fn object(&self, class: &str) -> TypeId {
        self.types.object(self.name(class))
    }

    pub fn protocol_self(&self, protocol: &str) -> TypeId {
        self.types.protocol_self(self.name(protocol))
    }

    /// A tuple of `n` 64-bit integers: passed indirectly past four.
    pub fn wide(&self, n: usize) -> TypeId {
        self.types.tuple(vec![TypeId::I64; n])
    }

    pub fn sig(
        &self,
        convention: CallingConventionKind,
        self_ty: TypeId,
        params: Vec<TypeId>,
        result: TypeId,
    ) -> FunctionSignature {
        FunctionSignature {
            convention,
            generics: GenericSignature::EMPTY,
            self_ty,
            params,
            result,
            error: None,
        }
    }

    pub fn method(&self, owner: DeclContext, selector: &str, sig: FunctionSignature) -> MethodReference {
        let kind = if self.types.is_metatype(sig.self_ty) {
            MethodKind::Static
        } else {
            MethodKind::Instance
        };
        MethodReference::new(self.name("geo"), owner, self.name(selector), kind, sig)
    }

    pub fn class(&self, name: &str) -> DeclContext {
        DeclContext::Class(self.name(name))
    }

    pub fn protocol(&self, name: &str) -> DeclContext {
        DeclContext::Protocol(self.name(name))
    }

    pub fn decl(
        &self,
        method: &MethodReference,
        implementation: &str,
        visibility: Visibility,
        overrides: Option<&MethodReference>,
    ) -> MethodDecl {
        MethodDecl {
            method: method.clone(),
            implementation: self.name(implementation),
            visibility,
            overrides: overrides.cloned(),
        }
    }

    pub fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new(
            self.name("geo"),
            Arc::clone(&self.interner),
            Arc::clone(&self.types),
        )
    }

    pub fn module(&self, metadata: ModuleMetadata, options: ThunkOptions) -> ThunkModule {
        ThunkModule::new(
            Services {
                interner: Arc::clone(&self.interner),
                types: Arc::clone(&self.types),
                layout: Arc::new(TargetLayout::new(
                    Arc::clone(&self.types),
                    LayoutConfig::default(),
                )),
                metadata: Arc::new(metadata),
            },
            options,
        )
    }
}

/// `Shape` <- `Square` plus protocol `Drawable` with `Square: Drawable`.
///
/// ```text
/// class Shape (resilient when asked)
///   area()   -> f64                  public
///   scale(i32, i32)                  internal
///   make() static -> Shape           public
///   load(i64) async throws -> wide6  public
///   points() yield_once -> i64       public
/// class Square: Shape
///   area()   -> f64                  public, overrides Shape.area
///   corners() -> i64                 public
/// protocol Drawable
///   bounds() -> (i64, i64)
///   label()  -> i64
///   draw(i64, i64) -> i64            witness slot 3
/// ```
pub(crate) struct Geo {
    pub env: Env,
    pub module: ThunkModule,
    pub area: MethodReference,
    pub scale: MethodReference,
    pub make: MethodReference,
    pub load: MethodReference,
    pub points: MethodReference,
    pub square_area: MethodReference,
    pub corners: MethodReference,
    pub draw: MethodReference,
}

impl Geo {
    pub fn new(options: ThunkOptions) -> Self {
        Self::build(options, false)
    }

    pub fn resilient(options: ThunkOptions) -> Self {
        Self::build(options, true)
    }

    fn build(options: ThunkOptions, resilient: bool) -> Self {
        use CallingConventionKind::{Asynchronous, Ordinary, YieldingCoroutine};

        let env = Env::new();
        let shape = env.object("Shape");
        let square = env.object("Square");
        let drawable = env.protocol_self("Drawable");

        let area = env.method(env.class("Shape"), "area", env.sig(Ordinary, shape, vec![], TypeId::F64));
        let scale = env.method(
            env.class("Shape"),
            "scale",
            env.sig(Ordinary, shape, vec![TypeId::I32, TypeId::I32], TypeId::UNIT),
        );
        let make = env.method(
            env.class("Shape"),
            "make",
            env.sig(Ordinary, env.types.metatype(env.name("Shape")), vec![], shape),
        );
        let mut load_sig = env.sig(Asynchronous, shape, vec![TypeId::I64], env.wide(6));
        load_sig.error = Some(TypeId::I64);
        let load = env.method(env.class("Shape"), "load", load_sig);
        let points = env.method(
            env.class("Shape"),
            "points",
            env.sig(YieldingCoroutine, shape, vec![], TypeId::I64),
        );
        let square_area =
            env.method(env.class("Square"), "area", env.sig(Ordinary, square, vec![], TypeId::F64));
        let corners =
            env.method(env.class("Square"), "corners", env.sig(Ordinary, square, vec![], TypeId::I64));

        let pair = env.types.tuple(vec![TypeId::I64, TypeId::I64]);
        let bounds = env.method(env.protocol("Drawable"), "bounds", env.sig(Ordinary, drawable, vec![], pair));
        let label = env.method(env.protocol("Drawable"), "label", env.sig(Ordinary, drawable, vec![], TypeId::I64));
        let draw = env.method(
            env.protocol("Drawable"),
            "draw",
            env.sig(Ordinary, drawable, vec![TypeId::I64, TypeId::I64], TypeId::I64),
        );

        let mut meta = env.metadata();
        meta.add_class(ClassDecl {
            name: env.name("Shape"),
            superclass: None,
            resilient,
            methods: vec![
                env.decl(&area, "shape_area", Visibility::Public, None),
                env.decl(&scale, "shape_scale", Visibility::Internal, None),
                env.decl(&make, "shape_make", Visibility::Public, None),
                env.decl(&load, "shape_load", Visibility::Public, None),
                env.decl(&points, "shape_points", Visibility::Public, None),
            ],
        });
        meta.add_class(ClassDecl {
            name: env.name("Square"),
            superclass: Some(env.name("Shape")),
            resilient: false,
            methods: vec![
                env.decl(&square_area, "square_area", Visibility::Public, Some(&area)),
                env.decl(&corners, "square_corners", Visibility::Public, None),
            ],
        });
        meta.add_protocol(ProtocolDecl {
            name: env.name("Drawable"),
            requirements: vec![bounds, label, draw.clone()],
        });
        meta.add_conformance(Conformance {
            ty: env.name("Square"),
            protocol: env.name("Drawable"),
            witnesses: vec![
                env.name("square_bounds"),
                env.name("square_label"),
                env.name("square_draw"),
            ],
        })
        .unwrap();

        let module = env.module(meta, options);
        Self {
            env,
            module,
            area,
            scale,
            make,
            load,
            points,
            square_area,
            corners,
            draw,
        }
    }
}

pub(crate) fn count(func: &ThunkFunction, pred: impl Fn(&Instr) -> bool) -> usize {
    func.instructions().filter(|i| pred(i)).count()
}
