use crate::error::{Error, Result};

/// Numeric architecture code used when the architecture is not set
pub const ARCH_UNKNOWN: i32 = 0;

// (code, canonical name, aliases)
const ARCHITECTURES: &[(i32, &str, &[&str])] = &[
    (1, "i686", &["i386", "i586", "386", "x86", "generic_32"]),
    (2, "x86_64", &["amd64", "generic_64"]),
    (3, "armv7l", &["armel", "armhf", "arm", "armhfp", "armv7a_hardfp", "armv7", "armv7a_vfpv3_hardfp"]),
    (4, "aarch64", &["arm64", "arm64_generic"]),
    (5, "ppc", &["powerpc"]),
    (6, "ppc64", &["powerpc64"]),
    (7, "ppc64le", &["ppc64el"]),
    (8, "s390x", &[]),
    (9, "mips", &["mipsel", "mipsle"]),
    (10, "mips64", &["mips64el", "mips64le"]),
    (11, "riscv32", &[]),
    (12, "riscv64", &[]),
    (13, "armv6l", &["armv6", "armv6hf"]),
    (14, "armv8l", &["armv8", "arm32"]),
    (15, "loongarch64", &["loong64"]),
];

/// Resolves an architecture name or alias to its numeric code
pub fn architecture_id(name: &str) -> Result<i32> {
    ARCHITECTURES
        .iter()
        .find(|(_, canonical, aliases)| *canonical == name || aliases.contains(&name))
        .map(|(code, _, _)| *code)
        .ok_or_else(|| Error::bad_request(format!("Architecture isn't supported: {}", name)))
}

pub fn architecture_name(code: i32) -> Option<&'static str> {
    ARCHITECTURES
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, canonical, _)| *canonical)
}

/// Lenient decode used by instance updates: anything unrecognised is "unset".
pub fn architecture_id_or_unknown(name: Option<&str>) -> i32 {
    name.and_then(|n| architecture_id(n).ok())
        .unwrap_or(ARCH_UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_lookup() {
        assert_eq!(architecture_id("x86_64").unwrap(), 2);
        assert_eq!(architecture_id("amd64").unwrap(), 2);
        assert_eq!(architecture_id("arm64").unwrap(), 4);
        assert_eq!(architecture_name(4), Some("aarch64"));
        assert_eq!(architecture_name(99), None);
        assert!(architecture_id("pdp11").is_err());
    }

    #[test]
    fn test_unrecognised_architecture_is_unset() {
        // Documented leniency: a bad architecture never fails an update
        assert_eq!(architecture_id_or_unknown(Some("not-an-arch")), ARCH_UNKNOWN);
        assert_eq!(architecture_id_or_unknown(Some("")), ARCH_UNKNOWN);
        assert_eq!(architecture_id_or_unknown(None), ARCH_UNKNOWN);
        assert_eq!(architecture_id_or_unknown(Some("riscv64")), 12);
    }
}
