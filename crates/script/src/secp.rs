use std::sync::OnceLock;

use secp256k1::{Secp256k1, VerifyOnly};

pub fn secp256k1_verify() -> &'static Secp256k1<VerifyOnly> {
    static CONTEXT: OnceLock<Secp256k1<VerifyOnly>> = OnceLock::new();
    CONTEXT.get_or_init(Secp256k1::verification_only)
}
