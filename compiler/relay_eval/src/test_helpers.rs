//! A small class hierarchy with native implementations installed.

use std::sync::Arc;

use relay_abi::{
    ClassDecl, Conformance, LayoutConfig, MethodDecl, ModuleMetadata, ProtocolDecl, TargetLayout,
};
use relay_ir::{
    CallingConventionKind, DeclContext, FunctionSignature, GenericSignature, MethodKind,
    MethodReference, StringInterner, TypeId, TypePool, Visibility,
};
use relay_thunk::{Services, ThunkModule, ThunkOptions};

use crate::Machine;

/// ```text
/// class Animal
///   speak() -> i64                   animal_speak = 1
///   weigh(i32, i16) -> i32           animal_weigh = a + b     internal
///   nap(i64) async -> i64            animal_nap = x + 1
/// class Dog: Animal
///   speak() -> i64                   dog_speak = 2            overrides
///   fetch(i64) throws i64 -> i64     dog_fetch = 2x, fails with 99 on 0
/// protocol Pet
///   name() -> i64                    dog_name = 7
///   greet(i64) -> i64                dog_greet = x + 100
/// ```
pub(crate) struct Zoo {
    pub machine: Machine,
    pub speak: MethodReference,
    pub weigh: MethodReference,
    pub nap: MethodReference,
    pub fetch: MethodReference,
    pub greet: MethodReference,
}

impl Zoo {
    pub fn new(options: ThunkOptions) -> Self {
        Self::build(options, false)
    }

    pub fn resilient(options: ThunkOptions) -> Self {
        Self::build(options, true)
    }

    fn build(options: ThunkOptions, resilient: bool) -> Self {
        use CallingConventionKind::{Asynchronous, Ordinary};

        let interner = StringInterner::shared();
        let types = Arc::new(TypePool::new());
        let module = interner.intern("zoo");
        let animal = types.object(interner.intern("Animal"));
        let dog = types.object(interner.intern("Dog"));
        let pet = types.protocol_self(interner.intern("Pet"));

        let sig = |convention, self_ty, params: Vec<TypeId>, result, error| FunctionSignature {
            convention,
            generics: GenericSignature::EMPTY,
            self_ty,
            params,
            result,
            error,
        };
        let method = |owner: DeclContext, selector: &str, signature| {
            MethodReference::new(
                module,
                owner,
                interner.intern(selector),
                MethodKind::Instance,
                signature,
            )
        };
        let class = |name: &str| DeclContext::Class(interner.intern(name));
        let decl = |method: &MethodReference, imp: &str, visibility, overrides: Option<&MethodReference>| {
            MethodDecl {
                method: method.clone(),
                implementation: interner.intern(imp),
                visibility,
                overrides: overrides.cloned(),
            }
        };

        let speak = method(class("Animal"), "speak", sig(Ordinary, animal, vec![], TypeId::I64, None));
        let weigh = method(
            class("Animal"),
            "weigh",
            sig(Ordinary, animal, vec![TypeId::I32, TypeId::I16], TypeId::I32, None),
        );
        let nap = method(
            class("Animal"),
            "nap",
            sig(Asynchronous, animal, vec![TypeId::I64], TypeId::I64, None),
        );
        let dog_speak = method(class("Dog"), "speak", sig(Ordinary, dog, vec![], TypeId::I64, None));
        let fetch = method(
            class("Dog"),
            "fetch",
            sig(Ordinary, dog, vec![TypeId::I64], TypeId::I64, Some(TypeId::I64)),
        );
        let pet_owner = DeclContext::Protocol(interner.intern("Pet"));
        let name = method(pet_owner, "name", sig(Ordinary, pet, vec![], TypeId::I64, None));
        let greet = method(pet_owner, "greet", sig(Ordinary, pet, vec![TypeId::I64], TypeId::I64, None));

        let mut meta = ModuleMetadata::new(module, Arc::clone(&interner), Arc::clone(&types));
        meta.add_class(ClassDecl {
            name: interner.intern("Animal"),
            superclass: None,
            resilient,
            methods: vec![
                decl(&speak, "animal_speak", Visibility::Public, None),
                decl(&weigh, "animal_weigh", Visibility::Internal, None),
                decl(&nap, "animal_nap", Visibility::Public, None),
            ],
        });
        meta.add_class(ClassDecl {
            name: interner.intern("Dog"),
            superclass: Some(interner.intern("Animal")),
            resilient: false,
            methods: vec![
                decl(&dog_speak, "dog_speak", Visibility::Public, Some(&speak)),
                decl(&fetch, "dog_fetch", Visibility::Public, None),
            ],
        });
        meta.add_protocol(ProtocolDecl {
            name: interner.intern("Pet"),
            requirements: vec![name, greet.clone()],
        });
        meta.add_conformance(Conformance {
            ty: interner.intern("Dog"),
            protocol: interner.intern("Pet"),
            witnesses: vec![interner.intern("dog_name"), interner.intern("dog_greet")],
        })
        .unwrap();

        let meta = Arc::new(meta);
        let thunks = Arc::new(ThunkModule::new(
            Services {
                interner: Arc::clone(&interner),
                types: Arc::clone(&types),
                layout: Arc::new(TargetLayout::new(Arc::clone(&types), LayoutConfig::default())),
                metadata: meta.clone(),
            },
            options,
        ));

        let mut machine = Machine::new(thunks, meta).unwrap();
        machine.implement("animal_speak", |_| Ok(vec![1])).unwrap();
        machine.implement("dog_speak", |_| Ok(vec![2])).unwrap();
        machine
            .implement("animal_weigh", |inv| {
                Ok(vec![(inv.args[0].scalar() + inv.args[1].scalar()) & 0xFFFF_FFFF])
            })
            .unwrap();
        machine
            .implement("animal_nap", |inv| Ok(vec![inv.args[0].scalar() + 1]))
            .unwrap();
        machine
            .implement("dog_fetch", |inv| match inv.args[0].scalar() {
                0 => Err(99),
                x => Ok(vec![x * 2]),
            })
            .unwrap();
        machine.implement("dog_name", |_| Ok(vec![7])).unwrap();
        machine
            .implement("dog_greet", |inv| Ok(vec![inv.args[0].scalar() + 100]))
            .unwrap();

        Self {
            machine,
            speak,
            weigh,
            nap,
            fetch,
            greet,
        }
    }
}
