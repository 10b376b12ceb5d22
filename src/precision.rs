use std::{
    error::Error,
    fmt::{self, Display},
    sync::OnceLock,
};

/// Process-wide numeric execution policy.
///
/// `MixedF16` enables loss scaling during backprop, the training-loop half of
/// mixed-precision execution: the loss gradient is multiplied by a fixed scale
/// before the backward pass and the parameter gradients are divided by the
/// same scale before the optimizer step, keeping small gradients away from
/// the underflow region of half-precision storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Float32,
    MixedF16,
}

impl Policy {
    /// The loss scale the trainer applies under this policy.
    pub fn loss_scale(&self) -> f32 {
        match self {
            Policy::Float32 => 1.0,
            Policy::MixedF16 => 1024.0,
        }
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Float32 => write!(f, "float32"),
            Policy::MixedF16 => write!(f, "mixed_float16"),
        }
    }
}

static POLICY: OnceLock<Policy> = OnceLock::new();

/// Sets the global policy. Must be called at most once, before model
/// construction; a second call is an error.
pub fn set_global_policy(policy: Policy) -> std::result::Result<(), PolicyErr> {
    POLICY
        .set(policy)
        .map_err(|_| PolicyErr { current: global_policy() })
}

/// Returns the global policy, defaulting to [`Policy::Float32`].
pub fn global_policy() -> Policy {
    POLICY.get().copied().unwrap_or(Policy::Float32)
}

/// The global policy was already set.
#[derive(Debug)]
pub struct PolicyErr {
    current: Policy,
}

impl Display for PolicyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the numeric policy is already set to {} and cannot be changed",
            self.current
        )
    }
}

impl Error for PolicyErr {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_scale_per_policy() {
        assert_eq!(Policy::Float32.loss_scale(), 1.0);
        assert_eq!(Policy::MixedF16.loss_scale(), 1024.0);
    }

    #[test]
    fn setting_twice_is_an_error() {
        // Whichever value wins the first set, the second set must fail.
        let _ = set_global_policy(Policy::Float32);
        assert!(set_global_policy(Policy::MixedF16).is_err());
    }
}
