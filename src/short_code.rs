use std::{iter, sync::Arc};

use rearch::CapsuleHandle;

/// Number of characters in a generated short code.
pub const SHORT_CODE_LEN: usize = 6;

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn code_generator_capsule(_: CapsuleHandle) -> Arc<dyn CodeGenerator> {
    Arc::new(RandomCodeGenerator)
}

/// Produces candidate short codes.
///
/// Generated codes are not checked against existing links,
/// so two links can end up sharing a code.
#[cfg_attr(test, mockall::automock)]
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Draws [`SHORT_CODE_LEN`] base-36 characters from the thread-local RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        iter::repeat_with(|| char::from(BASE36_ALPHABET[rand::random_range(0..BASE36_ALPHABET.len())]))
            .take(SHORT_CODE_LEN)
            .collect()
    }
}
