mod detour;
mod kind;
mod registry;
mod signature;

pub use detour::{DetourSpec, InstalledDetour, SitePatch, assemble};
pub use kind::{BaseAccess, HookKind};
pub use registry::{HookRegistry, HookState};
pub use signature::{
    HookSignature, ResolveStep, SignatureSet, builtin_signatures, load_signatures,
    save_signatures,
};
