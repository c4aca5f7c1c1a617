//! Request authentication helpers shared by dine ingress services.

pub mod signature;

pub use signature::{
    SIGNATURE_HEADER, SignatureError, SignatureErrorKind, compute_signature, constant_time_eq,
    verify_signature,
};
