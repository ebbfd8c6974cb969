//! Choosing and loading the implementation a thunk forwards to.

use relay_ir::{MethodKind, MethodReference, PointerAuthInfo, VTableOffset, VarId};

use crate::emit::FunctionContext;
use crate::marshal::PreparedArguments;
use crate::module::ThunkModule;
use crate::{internal_error, ServiceResultExt};

/// Where a method's implementation is found, fixed by its declaring
/// context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CallTarget {
    /// Slot `index` of the receiver's witness table.
    Witness { index: u32 },
    /// A virtual table slot of the receiver's class metadata, signed with
    /// `auth` when pointer authentication is enabled.
    Virtual {
        offset: VTableOffset,
        auth: Option<PointerAuthInfo>,
    },
}

/// The loaded implementation and the receiver to pass it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ResolvedTarget {
    pub function: VarId,
    pub receiver: VarId,
}

impl CallTarget {
    pub fn for_method(module: &ThunkModule, method: &MethodReference) -> Self {
        let metadata = module.metadata();
        if method.is_witness_method() {
            return CallTarget::Witness {
                index: metadata
                    .witness_index(method)
                    .or_internal("resolving a witness table slot"),
            };
        }
        let offset = metadata
            .vtable_offset(method)
            .or_internal("resolving a virtual table slot");
        let auth = module.options().pointer_auth.map(|schema| {
            schema.info(
                metadata
                    .method_discriminator(method)
                    .or_internal("computing a method discriminator"),
            )
        });
        CallTarget::Virtual { offset, auth }
    }

    /// Emit the loads producing the implementation pointer.
    pub fn resolve(
        &self,
        cx: &mut FunctionContext<'_>,
        arguments: &PreparedArguments,
    ) -> ResolvedTarget {
        let receiver = arguments.receiver;
        let function = match self {
            CallTarget::Witness { index } => {
                let Some(witness) = arguments.witness else {
                    internal_error("witness dispatch without a witness table")
                };
                cx.builder.emit_witness_method(witness.table, *index)
            }
            CallTarget::Virtual { offset, auth } => {
                let receiver_is_metadata = cx.method.kind == MethodKind::Static
                    || cx.module.types().is_metatype(cx.method.signature.self_ty);
                let metadata = if receiver_is_metadata {
                    receiver
                } else {
                    cx.builder.emit_heap_metadata(receiver)
                };
                let loaded = cx.builder.emit_vtable_method(metadata, *offset);
                match auth {
                    Some(info) => cx.builder.emit_authenticate(loaded, *info),
                    None => loaded,
                }
            }
        };
        ResolvedTarget { function, receiver }
    }
}
