//! Per-model maximum repeat count for a single `sendir`.

/// Returns the maximum `repeat` count a `sendir` may carry before the scheduler must
/// fall back to chaining continuous-repeat transmissions.
pub trait MaxRepeatsPolicy: Send + Sync {
    fn max_repeats(&self, version: Option<&str>) -> u32;
}

/// Always reports the iTach limit, ignoring the reported firmware version.
///
/// Matches the reference dispatcher, which hardcodes 50 pending a way to derive the
/// real limit from `getversion`'s output.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl MaxRepeatsPolicy for DefaultPolicy {
    fn max_repeats(&self, _version: Option<&str>) -> u32 {
        50
    }
}

/// Recognizes the gateway family from its version string and returns its documented
/// per-`sendir` repeat ceiling, falling back to the iTach value when unrecognized.
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionedPolicy;

impl MaxRepeatsPolicy for VersionedPolicy {
    fn max_repeats(&self, version: Option<&str>) -> u32 {
        let Some(version) = version else { return 50 };
        let lower = version.to_ascii_lowercase();
        if lower.contains("gc-100") {
            31
        } else if lower.contains("flex") || lower.contains("global connect") {
            20
        } else {
            50
        }
    }
}
